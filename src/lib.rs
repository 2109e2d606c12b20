//! Pi-Cam-Probe: camera diagnostics for the Raspberry Pi
//!
//! Probes the camera through an ordered chain of capture backends
//! (libcamera, a GStreamer pipeline, raw V4L2 nodes), stops at the first one
//! that delivers a frame, saves that frame as a JPEG, and optionally shows a
//! live preview in the terminal. Backends sit behind the
//! [`CaptureBackend`]/[`CaptureSource`] traits so the probe logic can be
//! tested with mock sources.

pub mod backends;
pub mod config;
pub mod console;
pub mod fallback;
pub mod frame;
pub mod guard;
pub mod preview;
pub mod probe;
pub mod signal;
pub mod terminal;
pub mod traits;

#[cfg(test)]
pub mod mock;

pub use backends::{build_backend, build_chain};
pub use config::{default_chain, BackendDescriptor, BackendKind, ProbeConfig};
pub use fallback::{report_outcome, ChainOutcome, FallbackChain, REMEDIATION_HINTS};
pub use frame::{Frame, FrameMetadata};
pub use preview::{run_preview, CancelSignal, FrameDisplay, PreviewOutcome, StopReason};
pub use probe::{BackendProbe, ProbeFailure, ProbeResult};
pub use signal::Interrupt;
pub use traits::{
    CameraError, CaptureBackend, CaptureSource, DeviceCapabilities, Format, FourCC, PixelFormat,
};
