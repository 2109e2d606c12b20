//! Ordered fallback across backends, stopping at the first that yields a frame.

use log::info;
use std::io::Write;

use crate::config::ProbeConfig;
use crate::probe::{BackendProbe, ProbeResult};
use crate::say;
use crate::signal::Interrupt;
use crate::traits::CaptureBackend;

/// Printed when every backend failed.
pub const REMEDIATION_HINTS: [&str; 4] = [
    "Restart the camera stack: `sudo systemctl restart pipewire wireplumber` or reboot the Pi",
    "Check the camera with the vendor tool: `rpicam-hello --list-cameras` (or `libcamera-hello`)",
    "Reseat the ribbon cable with the Pi powered off, contacts facing the right way",
    "Check permissions: your user must be in the `video` group (`groups`, `ls -l /dev/video*`)",
];

/// Results of one pass over the chain.
#[derive(Debug, Clone, Default)]
pub struct ChainOutcome {
    results: Vec<ProbeResult>,
    winner: Option<usize>,
    interrupted: bool,
}

impl ChainOutcome {
    /// One result per backend that was attempted, in order.
    pub fn results(&self) -> &[ProbeResult] {
        &self.results
    }

    /// The first result with at least one frame and no failure.
    pub fn winner(&self) -> Option<&ProbeResult> {
        self.winner.and_then(|index| self.results.get(index))
    }

    /// Whether any backend produced a frame.
    pub const fn succeeded(&self) -> bool {
        self.winner.is_some()
    }

    /// Whether the chain stopped because of an interrupt.
    pub const fn interrupted(&self) -> bool {
        self.interrupted
    }
}

/// Tries backends in order until one yields a frame.
pub struct FallbackChain<'a> {
    config: &'a ProbeConfig,
    interrupt: Interrupt,
}

impl<'a> FallbackChain<'a> {
    /// Chain sharing `config` and `interrupt` with every probe.
    pub const fn new(config: &'a ProbeConfig, interrupt: Interrupt) -> Self {
        Self { config, interrupt }
    }

    /// Probe `backends` in order. Backends after the first success are never opened.
    pub fn run(
        &self,
        backends: &mut [Box<dyn CaptureBackend>],
        out: &mut dyn Write,
    ) -> ChainOutcome {
        let probe = BackendProbe::new(self.config, self.interrupt.clone());
        let total = backends.len();
        let mut outcome = ChainOutcome::default();

        for (position, backend) in backends.iter_mut().enumerate() {
            if self.interrupt.is_set() {
                outcome.interrupted = true;
                break;
            }

            let index = position + 1;
            say!(out, "[{index}/{total}] {}", backend.descriptor().label());
            let result = probe.run(index, backend.as_mut(), out);
            let succeeded = result.succeeded();
            let interrupted = result.interrupted();
            outcome.results.push(result);

            if succeeded {
                outcome.winner = Some(outcome.results.len() - 1);
                break;
            }
            if interrupted {
                outcome.interrupted = true;
                break;
            }
        }

        if let Some(winner) = outcome.winner() {
            info!("camera reachable through {}", winner.backend_id());
        }
        outcome
    }
}

/// Print the per-backend summary, then the verdict and, on failure, the hints.
pub fn report_outcome(outcome: &ChainOutcome, out: &mut dyn Write) {
    say!(out, "");
    say!(out, "Summary:");
    for result in outcome.results() {
        let detail = result
            .failure()
            .map_or_else(String::new, |failure| format!(" ({failure})"));
        say!(
            out,
            "  [{}] {:<28} opened={:<5} frames={}/{}{detail}",
            result.backend_index(),
            result.label(),
            result.opened(),
            result.frames_succeeded(),
            result.frames_attempted()
        );
    }

    if let Some(winner) = outcome.winner() {
        say!(out, "");
        say!(out, "SUCCESS: camera works through {}", winner.label());
        if let Some(path) = winner.sample_path() {
            say!(out, "Sample frame saved to {}", path.display());
        }
        return;
    }

    say!(out, "");
    if outcome.interrupted() {
        say!(out, "Interrupted before any backend produced a frame.");
        return;
    }
    say!(out, "FAILURE: no backend produced a frame.");
    say!(out, "Things to try:");
    for hint in REMEDIATION_HINTS {
        say!(out, "  - {hint}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendDescriptor;
    use crate::mock::{MockBackend, ReadScript, SourceCounters};
    use crate::probe::ProbeFailure;
    use std::num::NonZeroU32;
    use std::time::Duration;

    fn config(dir: &std::path::Path) -> ProbeConfig {
        ProbeConfig::default()
            .with_frame_budget(NonZeroU32::new(5).expect("non-zero budget"))
            .with_read_interval(Duration::ZERO)
            .with_output_dir(dir)
    }

    fn boxed(backends: Vec<MockBackend>) -> (Vec<Box<dyn CaptureBackend>>, Vec<SourceCounters>) {
        let counters = backends.iter().map(MockBackend::counters).collect();
        let boxed = backends
            .into_iter()
            .map(|backend| Box::new(backend) as Box<dyn CaptureBackend>)
            .collect();
        (boxed, counters)
    }

    #[test]
    fn test_falls_back_past_open_failure_and_stops_at_success() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(dir.path());
        let (mut backends, counters) = boxed(vec![
            MockBackend::failing(BackendDescriptor::libcamera(0)),
            MockBackend::new(BackendDescriptor::v4l2(0), ReadScript::new(".x.x.")),
            MockBackend::new(BackendDescriptor::v4l2(1), ReadScript::new(".....")),
        ]);

        let mut out = Vec::new();
        let outcome = FallbackChain::new(&config, Interrupt::new()).run(&mut backends, &mut out);

        assert!(outcome.succeeded());
        assert_eq!(outcome.results().len(), 2);

        let first = &outcome.results()[0];
        assert!(!first.opened());
        assert!(matches!(first.failure(), Some(ProbeFailure::Open(_))));

        let winner = outcome.winner().expect("winner");
        assert_eq!(winner.backend_id(), "v4l2:video0");
        assert_eq!(winner.frames_succeeded(), 3);
        assert_eq!(winner.frames_attempted(), 5);

        assert_eq!(counters[0].releases(), 0);
        assert_eq!(counters[1].releases(), 1);
        assert_eq!(counters[2].opens(), 0, "no attempt after the winner");
    }

    #[test]
    fn test_backend_failing_after_a_frame_does_not_win() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(dir.path());
        let (mut backends, counters) = boxed(vec![
            MockBackend::new(BackendDescriptor::libcamera(0), ReadScript::new(".!")),
            MockBackend::new(BackendDescriptor::v4l2(0), ReadScript::new(".....")),
        ]);

        let mut out = Vec::new();
        let outcome = FallbackChain::new(&config, Interrupt::new()).run(&mut backends, &mut out);
        report_outcome(&outcome, &mut out);

        let first = &outcome.results()[0];
        assert_eq!(first.frames_succeeded(), 1);
        assert!(matches!(first.failure(), Some(ProbeFailure::Unexpected(_))));
        assert!(!first.succeeded());

        let winner = outcome.winner().expect("second backend should win");
        assert_eq!(winner.backend_index(), 2);
        assert_eq!(winner.frames_succeeded(), 5);
        assert_eq!(counters[0].releases(), 1);
        assert_eq!(counters[1].opens(), 1);

        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("SUCCESS: camera works through V4L2 /dev/video0"), "{text}");
    }

    #[test]
    fn test_first_success_wins_immediately() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(dir.path());
        let (mut backends, counters) = boxed(vec![
            MockBackend::new(BackendDescriptor::libcamera(0), ReadScript::new("x.")),
            MockBackend::new(BackendDescriptor::gstreamer("libcamerasrc"), ReadScript::new(".")),
        ]);

        let mut out = Vec::new();
        let outcome = FallbackChain::new(&config, Interrupt::new()).run(&mut backends, &mut out);

        assert_eq!(outcome.winner().map(ProbeResult::backend_index), Some(1));
        assert_eq!(counters[1].opens(), 0);
    }

    #[test]
    fn test_single_backend_without_frames_reports_remediation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(dir.path());
        let (mut backends, counters) =
            boxed(vec![MockBackend::new(BackendDescriptor::v4l2(0), ReadScript::new("xxxxx"))]);

        let mut out = Vec::new();
        let outcome = FallbackChain::new(&config, Interrupt::new()).run(&mut backends, &mut out);
        report_outcome(&outcome, &mut out);

        assert!(!outcome.succeeded());
        assert_eq!(outcome.results().len(), 1);
        assert_eq!(outcome.results()[0].frames_attempted(), 5);
        assert_eq!(counters[0].releases(), 1);

        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("FAILURE"), "{text}");
        for hint in REMEDIATION_HINTS {
            assert!(text.contains(hint), "missing hint {hint:?} in {text}");
        }
    }

    #[test]
    fn test_success_report_names_backend_and_sample() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(dir.path());
        let (mut backends, _) =
            boxed(vec![MockBackend::new(BackendDescriptor::v4l2(3), ReadScript::new("."))]);

        let mut out = Vec::new();
        let outcome = FallbackChain::new(&config, Interrupt::new()).run(&mut backends, &mut out);
        report_outcome(&outcome, &mut out);

        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("SUCCESS: camera works through V4L2 /dev/video3"), "{text}");
        assert!(text.contains("probe_b1_video3.jpg"), "{text}");
        assert!(!text.contains("Things to try"), "{text}");
    }

    #[test]
    fn test_interrupt_stops_chain() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(dir.path());
        let (mut backends, counters) = boxed(vec![
            MockBackend::failing(BackendDescriptor::libcamera(0)),
            MockBackend::new(BackendDescriptor::v4l2(0), ReadScript::new(".")),
        ]);
        let interrupt = Interrupt::new();
        interrupt.trigger();

        let mut out = Vec::new();
        let outcome = FallbackChain::new(&config, interrupt).run(&mut backends, &mut out);
        report_outcome(&outcome, &mut out);

        assert!(outcome.interrupted());
        assert!(outcome.results().is_empty());
        assert_eq!(counters[0].opens() + counters[1].opens(), 0);
        assert!(!String::from_utf8_lossy(&out).contains("Things to try"));
    }

    #[test]
    fn test_empty_chain_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(dir.path());
        let mut out = Vec::new();
        let outcome = FallbackChain::new(&config, Interrupt::new()).run(&mut [], &mut out);
        assert!(!outcome.succeeded());
        assert!(outcome.results().is_empty());
    }
}
