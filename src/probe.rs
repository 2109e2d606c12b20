//! One open-read-release attempt against a single backend.

use log::{debug, info, warn};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;

use crate::config::{BackendDescriptor, ProbeConfig};
use crate::guard::SourceGuard;
use crate::say;
use crate::signal::Interrupt;
use crate::traits::CaptureBackend;

/// Why a probe did not run to the end of its frame budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    /// The backend could not be opened.
    Open(String),
    /// A non-transient error stopped the read loop.
    Unexpected(String),
}

impl std::fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open(msg) => write!(f, "open failed: {msg}"),
            Self::Unexpected(msg) => write!(f, "unexpected failure: {msg}"),
        }
    }
}

/// Outcome of one backend attempt.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    backend_index: usize,
    backend_id: String,
    label: String,
    opened: bool,
    frames_succeeded: u32,
    frames_attempted: u32,
    sample_path: Option<PathBuf>,
    failure: Option<ProbeFailure>,
    interrupted: bool,
}

impl ProbeResult {
    fn new(backend_index: usize, descriptor: &BackendDescriptor) -> Self {
        Self {
            backend_index,
            backend_id: format!("{}:{}", descriptor.family(), descriptor.device_id()),
            label: descriptor.label(),
            opened: false,
            frames_succeeded: 0,
            frames_attempted: 0,
            sample_path: None,
            failure: None,
            interrupted: false,
        }
    }

    /// 1-based position in the fallback chain.
    pub const fn backend_index(&self) -> usize {
        self.backend_index
    }

    /// `family:device`, e.g. `v4l2:video0`.
    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    /// Human-readable backend description.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the source opened.
    pub const fn opened(&self) -> bool {
        self.opened
    }

    /// Reads that delivered a frame.
    pub const fn frames_succeeded(&self) -> u32 {
        self.frames_succeeded
    }

    /// Reads attempted.
    pub const fn frames_attempted(&self) -> u32 {
        self.frames_attempted
    }

    /// Where the sample JPEG was written, if it was.
    pub fn sample_path(&self) -> Option<&Path> {
        self.sample_path.as_deref()
    }

    /// Open or unexpected failure, if any.
    pub const fn failure(&self) -> Option<&ProbeFailure> {
        self.failure.as_ref()
    }

    /// Whether an interrupt cut the read loop short.
    pub const fn interrupted(&self) -> bool {
        self.interrupted
    }

    /// At least one frame was read and the backend never failed outright.
    ///
    /// An unexpected read failure after good frames still counts as a
    /// failed backend.
    pub const fn succeeded(&self) -> bool {
        self.frames_succeeded > 0 && self.failure.is_none()
    }
}

/// Runs the open-read-release sequence with a fixed frame budget.
pub struct BackendProbe<'a> {
    config: &'a ProbeConfig,
    interrupt: Interrupt,
}

impl<'a> BackendProbe<'a> {
    /// Probe with `config`, stopping early when `interrupt` is set.
    pub const fn new(config: &'a ProbeConfig, interrupt: Interrupt) -> Self {
        Self { config, interrupt }
    }

    /// Probe `backend`, which sits at 1-based chain position `index`.
    ///
    /// Never returns an error: every failure is folded into the result.
    /// An opened source is released exactly once, also when a read panics.
    pub fn run(
        &self,
        index: usize,
        backend: &mut dyn CaptureBackend,
        out: &mut dyn Write,
    ) -> ProbeResult {
        let descriptor = backend.descriptor().clone();
        let mut result = ProbeResult::new(index, &descriptor);
        info!("probing {} ({})", result.label, result.backend_id);

        let source = match backend.open() {
            Ok(source) => source,
            Err(err) => {
                warn!("{}: {err}", result.label);
                say!(out, "  open failed: {err}");
                result.failure = Some(ProbeFailure::Open(err.to_string()));
                return result;
            }
        };
        result.opened = true;
        say!(out, "  opened {}", result.label);

        let mut guard = SourceGuard::new(source, result.label.clone());
        let budget = self.config.frame_budget().get();
        let sample_path = self.config.sample_path(index, &descriptor);
        let mut sample_attempted = false;

        for attempt in 1..=budget {
            if attempt > 1 {
                thread::sleep(self.config.read_interval());
            }
            if self.interrupt.is_set() {
                say!(out, "  interrupted after {} read(s)", result.frames_attempted);
                result.interrupted = true;
                break;
            }

            result.frames_attempted += 1;
            match guard.read_frame() {
                Ok(frame) => {
                    result.frames_succeeded += 1;
                    say!(
                        out,
                        "  frame {attempt}/{budget}: {}x{} {} ok",
                        frame.width,
                        frame.height,
                        frame.pixel_format
                    );
                    if !sample_attempted {
                        sample_attempted = true;
                        match frame.save_jpeg(&sample_path) {
                            Ok(()) => {
                                say!(out, "  saved sample {}", sample_path.display());
                                result.sample_path = Some(sample_path.clone());
                            }
                            Err(err) => {
                                warn!("could not save {}: {err}", sample_path.display());
                                say!(out, "  could not save sample: {err}");
                            }
                        }
                    }
                }
                Err(err) if err.is_transient() => {
                    debug!("{}: read {attempt} missed: {err}", result.label);
                    say!(out, "  frame {attempt}/{budget}: miss ({err})");
                }
                Err(err) => {
                    warn!("{}: read {attempt} failed: {err}", result.label);
                    say!(out, "  unexpected failure: {err}");
                    result.failure = Some(ProbeFailure::Unexpected(err.to_string()));
                    break;
                }
            }
        }

        if let Err(err) = guard.release() {
            debug!("ignoring release error on {}: {err}", result.label);
        }
        info!(
            "{}: {}/{} frames",
            result.label, result.frames_succeeded, result.frames_attempted
        );
        result
    }
}
