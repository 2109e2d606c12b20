//! Cooperative interrupt flag shared by the probe, the chain and the preview.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::traits::Result;

/// Set once by Ctrl+C (or by a caller); polled, never waited on.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    /// A flag nothing will set except [`Interrupt::trigger`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a process-wide Ctrl+C handler that sets the returned flag.
    ///
    /// Can only succeed once per process.
    pub fn install() -> Result<Self> {
        let interrupt = Self::new();
        let flag = Arc::clone(&interrupt.flag);
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        })?;
        Ok(interrupt)
    }

    /// Mark the run as interrupted.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether an interrupt has been requested.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
