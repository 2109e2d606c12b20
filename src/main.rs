//! Pi-cam-probe binary: find a working camera backend, save a sample, preview.

use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{info, warn};
use std::io::{self, Write};
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

use pi_cam_probe::backends::{build_backend, build_chain, list_devices};
use pi_cam_probe::console::confirm;
use pi_cam_probe::terminal::{KeyboardCancel, TerminalDisplay};
use pi_cam_probe::traits::Result;
use pi_cam_probe::{
    default_chain, report_outcome, run_preview, say, BackendDescriptor, CameraError,
    FallbackChain, Interrupt, PixelFormat, ProbeConfig, ProbeResult, StopReason,
};

#[derive(Parser, Debug)]
#[command(
    name = "pi-cam-probe",
    version,
    about = "Check that a Raspberry Pi camera delivers frames",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    probe: ProbeArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe backends in order and report which one works (default)
    Probe(ProbeArgs),

    /// Live preview from the first backend that opens
    Preview(SelectArgs),

    /// List V4L2 device nodes and their capabilities
    Devices {
        /// Highest device index to look at, exclusive
        #[arg(long, default_value_t = 10)]
        count: u32,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    Libcamera,
    Gstreamer,
    V4l2,
}

impl Backend {
    const DEFAULT_ORDER: [Self; 3] = [Self::Libcamera, Self::Gstreamer, Self::V4l2];
}

#[derive(Args, Debug, Clone)]
struct SelectArgs {
    /// Backends to try, in order (repeatable); default libcamera, gstreamer, v4l2
    #[arg(long = "backend", value_enum)]
    backends: Vec<Backend>,

    /// libcamera camera index
    #[arg(long)]
    camera: Option<usize>,

    /// GStreamer source element(s) placed before the conversion stage
    #[arg(long)]
    pipeline: Option<String>,

    /// V4L2 device node; default scans /dev/video0 .. /dev/video{N-1}
    #[arg(long)]
    device: Option<PathBuf>,

    /// Number of /dev/video* nodes to scan
    #[arg(long, default_value_t = 5)]
    v4l2_devices: u32,

    #[arg(long, default_value_t = BackendDescriptor::DEFAULT_WIDTH)]
    width: u32,

    #[arg(long, default_value_t = BackendDescriptor::DEFAULT_HEIGHT)]
    height: u32,

    /// Pixel format: yuyv, rgb (rgb24), bgr (bgr24), mjpeg, grey, or a V4L2 fourcc;
    /// default per backend
    #[arg(long)]
    format: Option<PixelFormat>,

    /// Per-read timeout in milliseconds
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,
}

impl SelectArgs {
    fn descriptors(&self) -> Vec<BackendDescriptor> {
        let untouched = self.backends.is_empty()
            && self.camera.is_none()
            && self.pipeline.is_none()
            && self.device.is_none();
        let chain = if untouched {
            default_chain(0..self.v4l2_devices)
        } else {
            let order: &[Backend] = if self.backends.is_empty() {
                &Backend::DEFAULT_ORDER
            } else {
                &self.backends
            };
            order.iter().flat_map(|&backend| self.expand(backend)).collect()
        };

        chain
            .into_iter()
            .map(|descriptor| {
                let descriptor = descriptor
                    .with_resolution(self.width, self.height)
                    .with_timeout(Duration::from_millis(self.timeout_ms));
                match self.format {
                    Some(format) => descriptor.with_pixel_format(format),
                    None => descriptor,
                }
            })
            .collect()
    }

    fn expand(&self, backend: Backend) -> Vec<BackendDescriptor> {
        match backend {
            Backend::Libcamera => vec![BackendDescriptor::libcamera(self.camera.unwrap_or(0))],
            Backend::Gstreamer => vec![BackendDescriptor::gstreamer(
                self.pipeline.as_deref().unwrap_or("libcamerasrc"),
            )],
            Backend::V4l2 => match &self.device {
                Some(device) => vec![BackendDescriptor::v4l2_path(device)],
                None => (0..self.v4l2_devices).map(BackendDescriptor::v4l2).collect(),
            },
        }
    }
}

#[derive(Args, Debug, Clone)]
struct ProbeArgs {
    #[command(flatten)]
    select: SelectArgs,

    /// Reads per backend
    #[arg(long, default_value = "5")]
    frames: NonZeroU32,

    /// Pause between reads in milliseconds
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,

    /// Directory for the sample JPEG
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// File name prefix for the sample JPEG
    #[arg(long, default_value = "probe")]
    prefix: String,

    /// Start the preview after a successful probe without asking
    #[arg(long, conflicts_with = "no_prompt")]
    preview: bool,

    /// Never ask about the preview
    #[arg(long)]
    no_prompt: bool,
}

impl ProbeArgs {
    fn config(&self) -> ProbeConfig {
        ProbeConfig::default()
            .with_frame_budget(self.frames)
            .with_read_interval(Duration::from_millis(self.interval_ms))
            .with_output_dir(&self.output_dir)
            .with_prefix(&self.prefix)
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}

/// Returns whether the command succeeded.
fn run() -> Result<bool> {
    let cli = Cli::parse();
    match cli.command {
        Some(Command::Devices { count }) => {
            devices(count);
            Ok(true)
        }
        Some(Command::Preview(select)) => preview(&select, &Interrupt::install()?),
        Some(Command::Probe(args)) => probe(&args),
        None => probe(&cli.probe),
    }
}

fn probe(args: &ProbeArgs) -> Result<bool> {
    let interrupt = Interrupt::install()?;
    let config = args.config();
    let mut backends = build_chain(args.select.descriptors());
    let mut stdout = io::stdout();

    say!(&mut stdout, "Probing {} backend(s)", backends.len());
    let outcome = FallbackChain::new(&config, interrupt.clone()).run(&mut backends, &mut stdout);
    report_outcome(&outcome, &mut stdout);

    let Some(winner) = outcome.winner() else {
        return Ok(false);
    };
    if interrupt.is_set() || args.no_prompt {
        return Ok(true);
    }
    let wanted = args.preview
        || confirm(
            &mut io::stdin().lock(),
            &mut stdout,
            "Start a live preview? (Ctrl+C then Enter to quit)",
            &interrupt,
        )?;
    if wanted && !interrupt.is_set() {
        preview_winner(winner, &args.select, &interrupt)?;
    }
    Ok(true)
}

/// Preview the backend that won the probe.
fn preview_winner(winner: &ProbeResult, select: &SelectArgs, interrupt: &Interrupt) -> Result<()> {
    let Some(descriptor) = winner
        .backend_index()
        .checked_sub(1)
        .and_then(|position| select.descriptors().into_iter().nth(position))
    else {
        warn!("winning backend {} no longer selected", winner.backend_id());
        return Ok(());
    };
    let mut backend = build_backend(descriptor);
    let mut display = TerminalDisplay::new()?;
    let outcome = run_preview(backend.as_mut(), &mut display, &mut KeyboardCancel, interrupt)?;
    print_preview_outcome(outcome.frames_shown, &outcome.reason);
    Ok(())
}

fn preview(select: &SelectArgs, interrupt: &Interrupt) -> Result<bool> {
    let mut stdout = io::stdout();
    for mut backend in build_chain(select.descriptors()) {
        if interrupt.is_set() {
            break;
        }
        let label = backend.descriptor().label();
        let mut display = TerminalDisplay::new()?;
        match run_preview(backend.as_mut(), &mut display, &mut KeyboardCancel, interrupt) {
            Ok(outcome) => {
                say!(&mut stdout, "Previewed {label}");
                print_preview_outcome(outcome.frames_shown, &outcome.reason);
                return Ok(!matches!(outcome.reason, StopReason::Failed(_)));
            }
            Err(err @ (CameraError::OpenFailed(_) | CameraError::Unavailable(_))) => {
                say!(&mut stdout, "{label}: {err}");
                info!("trying the next backend");
            }
            Err(err) => return Err(err),
        }
    }
    say!(&mut stdout, "No backend could be opened for preview.");
    Ok(false)
}

fn print_preview_outcome(frames: u64, reason: &StopReason) {
    let mut stdout = io::stdout();
    match reason {
        StopReason::Cancelled => say!(&mut stdout, "Preview closed after {frames} frame(s)."),
        StopReason::Interrupted => {
            say!(&mut stdout, "Preview interrupted after {frames} frame(s).");
        }
        StopReason::Failed(err) => {
            say!(&mut stdout, "Preview stopped after {frames} frame(s): {err}");
        }
    }
    let _ = stdout.flush();
}

fn devices(count: u32) {
    let mut stdout = io::stdout();
    let found = list_devices(count);
    if found.is_empty() {
        say!(&mut stdout, "No /dev/video* nodes found.");
        return;
    }
    for device in found {
        let name = device.name.as_deref().unwrap_or("?");
        match &device.capabilities {
            Ok(caps) => say!(
                &mut stdout,
                "{}  {name}\n    driver={} card={} bus={} capture={} streaming={}",
                device.path.display(),
                caps.driver,
                caps.card,
                caps.bus_info,
                caps.can_capture,
                caps.can_stream
            ),
            Err(err) => say!(
                &mut stdout,
                "{}  {name}\n    (cannot query: {err})",
                device.path.display()
            ),
        }
    }
}
