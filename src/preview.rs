//! Live preview: read, convert, render, poll for cancellation.

use image::RgbImage;
use log::{debug, info, warn};
use std::thread;
use std::time::Duration;

use crate::guard::SourceGuard;
use crate::signal::Interrupt;
use crate::traits::{CameraError, CaptureBackend, Result};

/// Pause after a missed read so a dead source does not spin the CPU.
const MISS_BACKOFF: Duration = Duration::from_millis(20);

/// Somewhere to show frames.
pub trait FrameDisplay {
    /// Render one RGB frame.
    fn show(&mut self, image: &RgbImage) -> Result<()>;

    /// Free display resources. Called once when the preview ends.
    fn teardown(&mut self) -> Result<()>;
}

/// Non-blocking check for a stop request, polled once per iteration.
pub trait CancelSignal {
    /// Whether the operator asked to stop.
    fn cancelled(&mut self) -> Result<bool>;
}

/// Why the preview loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The cancel signal fired.
    Cancelled,
    /// The interrupt flag was set.
    Interrupted,
    /// A non-transient read error.
    Failed(String),
}

/// Counters and stop reason of a preview session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewOutcome {
    /// Frames rendered.
    pub frames_shown: u64,
    /// Reads or conversions that produced nothing.
    pub read_failures: u64,
    /// Why the loop stopped.
    pub reason: StopReason,
}

/// Tears the display down on every exit path.
struct DisplayGuard<'a> {
    display: &'a mut dyn FrameDisplay,
    active: bool,
}

impl DisplayGuard<'_> {
    fn show(&mut self, image: &RgbImage) -> Result<()> {
        self.display.show(image)
    }

    fn teardown(&mut self) -> Result<()> {
        if !std::mem::replace(&mut self.active, false) {
            return Ok(());
        }
        self.display.teardown()
    }
}

impl Drop for DisplayGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            debug!("ignoring display teardown error: {err}");
        }
    }
}

/// Run the preview until cancelled, interrupted, or the source fails.
///
/// Any error from opening the source is returned as
/// [`CameraError::OpenFailed`] (or `Unavailable` for a compiled-out
/// backend), so callers can tell it from a failure mid-preview. Once open, the source is
/// released and the display torn down before this returns, whichever way
/// the loop exits.
pub fn run_preview(
    backend: &mut dyn CaptureBackend,
    display: &mut dyn FrameDisplay,
    cancel: &mut dyn CancelSignal,
    interrupt: &Interrupt,
) -> Result<PreviewOutcome> {
    let label = backend.descriptor().label();
    let mut display = DisplayGuard {
        display,
        active: true,
    };
    let opened = backend.open().map_err(|err| match err {
        CameraError::OpenFailed(_) | CameraError::Unavailable(_) => err,
        other => CameraError::OpenFailed(format!("{label}: {other}")),
    })?;
    let mut source = SourceGuard::new(opened, label.clone());
    info!("preview started on {label}");

    let mut frames_shown = 0u64;
    let mut read_failures = 0u64;

    let reason = loop {
        if interrupt.is_set() {
            break StopReason::Interrupted;
        }

        match source.read_frame().and_then(|frame| frame.to_rgb_image()) {
            Ok(image) => {
                display.show(&image)?;
                frames_shown += 1;
            }
            Err(err) if err.is_transient() => {
                read_failures += 1;
                debug!("preview read missed: {err}");
                thread::sleep(MISS_BACKOFF);
            }
            Err(err) => {
                warn!("preview read failed: {err}");
                break StopReason::Failed(err.to_string());
            }
        }

        if cancel.cancelled()? {
            break StopReason::Cancelled;
        }
    };

    if let Err(err) = source.release() {
        debug!("ignoring release error on {label}: {err}");
    }
    display.teardown()?;
    info!("preview stopped after {frames_shown} frame(s): {reason:?}");

    Ok(PreviewOutcome {
        frames_shown,
        read_failures,
        reason,
    })
}
