//! Core traits and types for the capture backends.

use crate::config::BackendDescriptor;
use crate::frame::Frame;

/// Pixel format representation (e.g., YUYV, MJPG, RGB3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");
    /// BGR3 pixel format (24-bit BGR).
    pub const BGR3: Self = Self::new(b"BGR3");
    /// GREY pixel format (8-bit luma).
    pub const GREY: Self = Self::new(b"GREY");
}

impl std::fmt::Display for FourCC {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Pixel layout of a captured frame.
///
/// Byte order is memory order: `Bgr24` stores blue first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Packed 8-bit R, G, B.
    Rgb24,
    /// Packed 8-bit B, G, R.
    Bgr24,
    /// Packed 4:2:2 Y0 U Y1 V.
    Yuyv,
    /// One JPEG image per frame.
    Mjpeg,
    /// 8-bit luma only.
    Grey,
}

impl PixelFormat {
    /// Every supported format, in preference order for raw capture.
    pub const ALL: [Self; 5] = [Self::Yuyv, Self::Rgb24, Self::Bgr24, Self::Mjpeg, Self::Grey];

    /// V4L2 fourcc for this layout.
    #[must_use]
    pub const fn fourcc(self) -> FourCC {
        match self {
            Self::Rgb24 => FourCC::RGB3,
            Self::Bgr24 => FourCC::BGR3,
            Self::Yuyv => FourCC::YUYV,
            Self::Mjpeg => FourCC::MJPG,
            Self::Grey => FourCC::GREY,
        }
    }

    /// Map a V4L2 fourcc back to a layout, if it is one we can decode.
    #[must_use]
    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        Self::ALL.into_iter().find(|format| format.fourcc() == fourcc)
    }

    /// Bytes per pixel for packed formats, `None` for compressed ones.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            Self::Rgb24 | Self::Bgr24 => Some(3),
            Self::Yuyv => Some(2),
            Self::Grey => Some(1),
            Self::Mjpeg => None,
        }
    }

    /// Short lowercase name, as accepted on the command line.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Rgb24 => "rgb",
            Self::Bgr24 => "bgr",
            Self::Yuyv => "yuyv",
            Self::Mjpeg => "mjpeg",
            Self::Grey => "grey",
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = CameraError;

    fn from_str(value: &str) -> Result<Self> {
        let lower = value.to_ascii_lowercase();
        let name = match lower.as_str() {
            "rgb24" => "rgb",
            "bgr24" => "bgr",
            "gray" => "grey",
            other => other,
        };
        Self::ALL
            .into_iter()
            .find(|format| {
                format.name() == name || format.fourcc().to_string().eq_ignore_ascii_case(value)
            })
            .ok_or_else(|| CameraError::UnsupportedFormat(value.to_owned()))
    }
}

/// Video format specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Create a new packed format specification.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        let bpp = match fourcc.0 {
            [b'R', b'G', b'B', b'3'] | [b'B', b'G', b'R', b'3'] => 3,
            [b'G', b'R', b'E', b'Y'] => 1,
            _ => 2,
        };
        let stride = width * bpp;
        let size = stride * height;
        Self {
            width,
            height,
            fourcc,
            stride,
            size,
        }
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// Lifecycle of a capture source as seen by its guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Released, or never opened.
    Closed,
    /// Opened, no frame delivered yet.
    Open,
    /// At least one frame delivered.
    Streaming,
}

/// Error type for camera operations.
#[derive(Debug)]
pub enum CameraError {
    /// The backend could not be initialised.
    OpenFailed(String),
    /// A single read produced no usable frame.
    ReadFailed(String),
    /// A read did not complete in time.
    Timeout,
    /// Error during streaming operation.
    StreamError(String),
    /// Requested or delivered pixel format is not supported.
    UnsupportedFormat(String),
    /// The backend was not compiled into this binary.
    Unavailable(&'static str),
    /// Signal handler installation failed.
    Signal(String),
    /// Image encode/decode error.
    Image(image::ImageError),
    /// I/O error.
    Io(std::io::Error),
}

impl CameraError {
    /// Whether the error is a per-read miss that the probe tolerates.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::ReadFailed(_) | Self::Timeout)
    }
}

impl std::fmt::Display for CameraError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenFailed(msg) => write!(f, "Failed to open source: {msg}"),
            Self::ReadFailed(msg) => write!(f, "Frame read failed: {msg}"),
            Self::Timeout => write!(f, "Operation timed out"),
            Self::StreamError(msg) => write!(f, "Stream error: {msg}"),
            Self::UnsupportedFormat(fmt) => write!(f, "Format not supported: {fmt}"),
            Self::Unavailable(feature) => {
                write!(f, "Backend not available (build with --features {feature})")
            }
            Self::Signal(msg) => write!(f, "Signal handler error: {msg}"),
            Self::Image(err) => write!(f, "Image error: {err}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for CameraError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Image(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CameraError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<image::ImageError> for CameraError {
    fn from(err: image::ImageError) -> Self {
        Self::Image(err)
    }
}

impl From<ctrlc::Error> for CameraError {
    fn from(err: ctrlc::Error) -> Self {
        Self::Signal(err.to_string())
    }
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// A way of reaching the camera that can be opened on demand.
pub trait CaptureBackend {
    /// Open parameters this backend was built from.
    fn descriptor(&self) -> &BackendDescriptor;

    /// Open the source. Nothing needs releasing when this fails.
    fn open(&mut self) -> Result<Box<dyn CaptureSource>>;
}

/// An open connection to a backend.
///
/// Callers go through [`crate::guard::SourceGuard`], which calls
/// [`CaptureSource::release`] exactly once.
pub trait CaptureSource {
    /// Block until the next frame arrives, a timeout elapses, or an error occurs.
    fn read_frame(&mut self) -> Result<Frame>;

    /// Stop streaming and free the device.
    fn release(&mut self) -> Result<()>;
}
