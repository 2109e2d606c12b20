//! Concrete capture backends and the factory that picks one per descriptor.
//!
//! V4L2 is always built. GStreamer and libcamera need system libraries and
//! sit behind the `gstreamer` and `libcamera` features; when a feature is off
//! the descriptor still builds a backend, it just fails to open.

#[cfg(feature = "gstreamer")]
pub mod gstreamer;
#[cfg(feature = "libcamera")]
pub mod libcamera;
pub mod v4l2;

use crate::config::{BackendDescriptor, BackendKind};
use crate::traits::{CameraError, CaptureBackend, CaptureSource, Result};

pub use v4l2::{list_devices, DeviceInfo, V4l2Backend};

/// Build the backend that handles `descriptor`.
pub fn build_backend(descriptor: BackendDescriptor) -> Box<dyn CaptureBackend> {
    match descriptor.kind() {
        BackendKind::V4l2 { .. } => Box::new(V4l2Backend::new(descriptor)),
        #[cfg(feature = "gstreamer")]
        BackendKind::Gstreamer { .. } => Box::new(gstreamer::GstreamerBackend::new(descriptor)),
        #[cfg(not(feature = "gstreamer"))]
        BackendKind::Gstreamer { .. } => Box::new(UnavailableBackend::new(descriptor, "gstreamer")),
        #[cfg(feature = "libcamera")]
        BackendKind::Libcamera { .. } => Box::new(libcamera::LibcameraBackend::new(descriptor)),
        #[cfg(not(feature = "libcamera"))]
        BackendKind::Libcamera { .. } => Box::new(UnavailableBackend::new(descriptor, "libcamera")),
    }
}

/// Build backends for a whole chain, preserving order.
pub fn build_chain<I>(descriptors: I) -> Vec<Box<dyn CaptureBackend>>
where
    I: IntoIterator<Item = BackendDescriptor>,
{
    descriptors.into_iter().map(build_backend).collect()
}

/// Stand-in for a backend whose feature was compiled out.
#[cfg_attr(all(feature = "gstreamer", feature = "libcamera"), allow(dead_code))]
struct UnavailableBackend {
    descriptor: BackendDescriptor,
    feature: &'static str,
}

#[cfg_attr(all(feature = "gstreamer", feature = "libcamera"), allow(dead_code))]
impl UnavailableBackend {
    const fn new(descriptor: BackendDescriptor, feature: &'static str) -> Self {
        Self {
            descriptor,
            feature,
        }
    }
}

impl CaptureBackend for UnavailableBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn open(&mut self) -> Result<Box<dyn CaptureSource>> {
        Err(CameraError::Unavailable(self.feature))
    }
}
