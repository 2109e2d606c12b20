//! Backend open parameters and probe settings.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::traits::PixelFormat;

/// Which path to the camera a descriptor targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    /// Native libcamera, by index in the camera manager's list.
    Libcamera {
        /// Camera index.
        camera: usize,
    },
    /// A GStreamer source segment, e.g. `libcamerasrc` or `v4l2src device=/dev/video0`.
    Gstreamer {
        /// Pipeline text up to (not including) the caps filter and sink.
        source: String,
    },
    /// A V4L2 device node.
    V4l2 {
        /// Device path, e.g. `/dev/video0`.
        device: PathBuf,
    },
}

/// Open parameters for one backend candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    kind: BackendKind,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    timeout: Duration,
}

impl BackendDescriptor {
    /// Default capture width.
    pub const DEFAULT_WIDTH: u32 = 640;
    /// Default capture height.
    pub const DEFAULT_HEIGHT: u32 = 480;
    /// Default per-read timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

    fn new(kind: BackendKind, pixel_format: PixelFormat) -> Self {
        Self {
            kind,
            width: Self::DEFAULT_WIDTH,
            height: Self::DEFAULT_HEIGHT,
            pixel_format,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// libcamera camera `camera`, BGR output.
    #[must_use]
    pub fn libcamera(camera: usize) -> Self {
        Self::new(BackendKind::Libcamera { camera }, PixelFormat::Bgr24)
    }

    /// GStreamer pipeline starting with `source`, BGR output.
    #[must_use]
    pub fn gstreamer<S: Into<String>>(source: S) -> Self {
        Self::new(
            BackendKind::Gstreamer {
                source: source.into(),
            },
            PixelFormat::Bgr24,
        )
    }

    /// V4L2 device `/dev/video{index}`, YUYV output.
    #[must_use]
    pub fn v4l2(index: u32) -> Self {
        Self::v4l2_path(format!("/dev/video{index}"))
    }

    /// V4L2 device at an explicit path, YUYV output.
    #[must_use]
    pub fn v4l2_path<P: Into<PathBuf>>(device: P) -> Self {
        Self::new(
            BackendKind::V4l2 {
                device: device.into(),
            },
            PixelFormat::Yuyv,
        )
    }

    /// Set the target resolution.
    #[must_use]
    pub const fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the requested pixel format.
    #[must_use]
    pub const fn with_pixel_format(mut self, pixel_format: PixelFormat) -> Self {
        self.pixel_format = pixel_format;
        self
    }

    /// Set how long one read may block.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Backend kind and its target.
    pub const fn kind(&self) -> &BackendKind {
        &self.kind
    }

    /// Target width in pixels.
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Target height in pixels.
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Requested pixel format.
    pub const fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Per-read timeout.
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Short family name: `libcamera`, `gstreamer` or `v4l2`.
    pub const fn family(&self) -> &'static str {
        match self.kind {
            BackendKind::Libcamera { .. } => "libcamera",
            BackendKind::Gstreamer { .. } => "gstreamer",
            BackendKind::V4l2 { .. } => "v4l2",
        }
    }

    /// File-name-safe device identifier, e.g. `video0` or `gst-libcamerasrc`.
    pub fn device_id(&self) -> String {
        match &self.kind {
            BackendKind::Libcamera { camera } => format!("libcamera{camera}"),
            BackendKind::Gstreamer { source } => {
                let element = source.split_whitespace().next().unwrap_or("pipeline");
                format!("gst-{}", sanitize(element))
            }
            BackendKind::V4l2 { device } => {
                let name = device.file_name().unwrap_or(device.as_os_str());
                sanitize(&name.to_string_lossy())
            }
        }
    }

    /// Human-readable description for console output.
    pub fn label(&self) -> String {
        match &self.kind {
            BackendKind::Libcamera { camera } => format!("libcamera camera {camera}"),
            BackendKind::Gstreamer { source } => format!("GStreamer `{source}`"),
            BackendKind::V4l2 { device } => format!("V4L2 {}", device.display()),
        }
    }
}

fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// Default fallback order: camera library, then pipeline, then raw V4L2 nodes.
pub fn default_chain(v4l2_devices: std::ops::Range<u32>) -> Vec<BackendDescriptor> {
    let mut chain = vec![
        BackendDescriptor::libcamera(0),
        BackendDescriptor::gstreamer("libcamerasrc"),
    ];
    chain.extend(v4l2_devices.map(BackendDescriptor::v4l2));
    chain
}

/// Settings shared by every probe in a run.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    frame_budget: NonZeroU32,
    read_interval: Duration,
    output_dir: PathBuf,
    prefix: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            frame_budget: NonZeroU32::MIN.saturating_add(4),
            read_interval: Duration::from_millis(100),
            output_dir: PathBuf::from("."),
            prefix: "probe".to_owned(),
        }
    }
}

impl ProbeConfig {
    /// Set the maximum number of reads per backend.
    #[must_use]
    pub const fn with_frame_budget(mut self, frame_budget: NonZeroU32) -> Self {
        self.frame_budget = frame_budget;
        self
    }

    /// Set the pause between read attempts.
    #[must_use]
    pub const fn with_read_interval(mut self, read_interval: Duration) -> Self {
        self.read_interval = read_interval;
        self
    }

    /// Set the directory sample images are written to.
    #[must_use]
    pub fn with_output_dir<P: Into<PathBuf>>(mut self, output_dir: P) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    /// Set the sample file name prefix.
    #[must_use]
    pub fn with_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Maximum number of reads per backend.
    pub const fn frame_budget(&self) -> NonZeroU32 {
        self.frame_budget
    }

    /// Pause between read attempts.
    pub const fn read_interval(&self) -> Duration {
        self.read_interval
    }

    /// Directory sample images are written to.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Sample path for the backend at 1-based chain position `index`.
    pub fn sample_path(&self, index: usize, descriptor: &BackendDescriptor) -> PathBuf {
        self.output_dir.join(format!(
            "{}_b{index}_{}.jpg",
            self.prefix,
            descriptor.device_id()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_ids() {
        assert_eq!(BackendDescriptor::v4l2(3).device_id(), "video3");
        assert_eq!(BackendDescriptor::libcamera(1).device_id(), "libcamera1");
        assert_eq!(
            BackendDescriptor::gstreamer("v4l2src device=/dev/video0").device_id(),
            "gst-v4l2src"
        );
        assert_eq!(
            BackendDescriptor::v4l2_path("/dev/v4l/by-id/usb-cam.0").device_id(),
            "usb-cam_0"
        );
    }

    #[test]
    fn test_sample_path_is_deterministic() {
        let config = ProbeConfig::default()
            .with_output_dir("/tmp/out")
            .with_prefix("cam");
        let descriptor = BackendDescriptor::v4l2(0);
        assert_eq!(
            config.sample_path(3, &descriptor),
            PathBuf::from("/tmp/out/cam_b3_video0.jpg")
        );
        assert_eq!(config.sample_path(3, &descriptor), config.sample_path(3, &descriptor));
    }

    #[test]
    fn test_default_chain_order() {
        let chain = default_chain(0..5);
        let families: Vec<_> = chain.iter().map(BackendDescriptor::family).collect();
        assert_eq!(
            families,
            ["libcamera", "gstreamer", "v4l2", "v4l2", "v4l2", "v4l2", "v4l2"]
        );
        assert_eq!(chain.last().map(BackendDescriptor::device_id).as_deref(), Some("video4"));
    }

    #[test]
    fn test_default_probe_config() {
        let config = ProbeConfig::default();
        assert_eq!(config.frame_budget().get(), 5);
        assert_eq!(config.read_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_descriptor_builders() {
        let descriptor = BackendDescriptor::v4l2(0)
            .with_resolution(1280, 720)
            .with_pixel_format(PixelFormat::Mjpeg)
            .with_timeout(Duration::from_millis(500));
        assert_eq!((descriptor.width(), descriptor.height()), (1280, 720));
        assert_eq!(descriptor.pixel_format(), PixelFormat::Mjpeg);
        assert_eq!(descriptor.timeout(), Duration::from_millis(500));
        assert_eq!(descriptor.label(), "V4L2 /dev/video0");
    }
}
