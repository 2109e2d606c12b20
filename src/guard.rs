//! Scoped ownership of an open capture source.

use log::debug;

use crate::frame::Frame;
use crate::traits::{CaptureSource, Result, SourceState};

/// Owns an open source and releases it exactly once.
///
/// Release happens on [`SourceGuard::release`] or, failing that, on drop,
/// which also covers early returns and unwinding.
pub struct SourceGuard {
    source: Option<Box<dyn CaptureSource>>,
    state: SourceState,
    label: String,
}

impl SourceGuard {
    /// Take ownership of a freshly opened source.
    pub fn new(source: Box<dyn CaptureSource>, label: String) -> Self {
        Self {
            source: Some(source),
            state: SourceState::Open,
            label,
        }
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> SourceState {
        self.state
    }

    /// Read one frame; the first success moves the guard to `Streaming`.
    pub fn read_frame(&mut self) -> Result<Frame> {
        let source = self.source.as_mut().ok_or_else(|| {
            crate::traits::CameraError::StreamError(format!("{} already released", self.label))
        })?;
        let frame = source.read_frame()?;
        self.state = SourceState::Streaming;
        Ok(frame)
    }

    /// Release now and report the outcome. Later calls and drop are no-ops.
    pub fn release(&mut self) -> Result<()> {
        let Some(mut source) = self.source.take() else {
            return Ok(());
        };
        self.state = SourceState::Closed;
        debug!("releasing {}", self.label);
        source.release()
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            debug!("ignoring release error on {}: {err}", self.label);
        }
    }
}
