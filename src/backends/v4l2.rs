//! V4L2 backend using the v4l crate.

use log::{debug, info, warn};
use ouroboros::self_referencing;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::{CaptureStream as _, Stream as _};
use v4l::video::Capture;
use v4l::Device;

use crate::config::{BackendDescriptor, BackendKind};
use crate::frame::{pack_rows, Frame, FrameMetadata};
use crate::traits::{
    CameraError, CaptureBackend, CaptureSource, DeviceCapabilities, Format, FourCC, PixelFormat,
    Result,
};

/// Number of mmap buffers queued with the driver.
const BUFFER_COUNT: u32 = 4;

/// Opens a V4L2 capture node and streams from it with mmap buffers.
pub struct V4l2Backend {
    descriptor: BackendDescriptor,
}

impl V4l2Backend {
    /// Backend for a V4L2 descriptor.
    pub const fn new(descriptor: BackendDescriptor) -> Self {
        Self { descriptor }
    }
}

impl CaptureBackend for V4l2Backend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn open(&mut self) -> Result<Box<dyn CaptureSource>> {
        let BackendKind::V4l2 { device: path } = self.descriptor.kind() else {
            return Err(CameraError::OpenFailed(format!(
                "{} is not a V4L2 descriptor",
                self.descriptor.label()
            )));
        };

        let device = Device::with_path(path).map_err(|err| open_failed(path, &err))?;
        let capabilities = query_capabilities(&device).map_err(|err| open_failed(path, &err))?;
        if !capabilities.can_capture || !capabilities.can_stream {
            return Err(CameraError::OpenFailed(format!(
                "{} ({}) is not a streaming capture node",
                path.display(),
                capabilities.card
            )));
        }

        let requested = Format::new(
            self.descriptor.width(),
            self.descriptor.height(),
            self.descriptor.pixel_format().fourcc(),
        );
        let format = set_format(&device, &requested).map_err(|err| open_failed(path, &err))?;
        let pixel_format = PixelFormat::from_fourcc(format.fourcc)
            .ok_or_else(|| CameraError::UnsupportedFormat(format.fourcc.to_string()))?;
        if format != requested {
            warn!(
                "{}: requested {}x{} {}, driver chose {}x{} {}",
                path.display(),
                requested.width,
                requested.height,
                requested.fourcc,
                format.width,
                format.height,
                format.fourcc
            );
        }

        let mut state = StreamState::try_new(device, |device| {
            Stream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
        })
        .map_err(|err| open_failed(path, &err))?;
        let timeout = self.descriptor.timeout();
        state.with_stream_mut(|stream| stream.set_timeout(timeout));

        info!(
            "opened {} ({}, {}x{} {})",
            path.display(),
            capabilities.card,
            format.width,
            format.height,
            format.fourcc
        );

        Ok(Box::new(V4l2Source {
            path: path.clone(),
            state: Some(state),
            format,
            pixel_format,
        }))
    }
}

#[self_referencing]
struct StreamState {
    device: Device,
    #[borrows(device)]
    #[not_covariant]
    stream: Stream<'this>,
}

/// An open, mmap-streaming V4L2 node.
pub struct V4l2Source {
    path: PathBuf,
    state: Option<StreamState>,
    format: Format,
    pixel_format: PixelFormat,
}

impl CaptureSource for V4l2Source {
    fn read_frame(&mut self) -> Result<Frame> {
        let state = self.state.as_mut().ok_or_else(|| {
            CameraError::StreamError(format!("{} already released", self.path.display()))
        })?;
        let format = &self.format;
        let pixel_format = self.pixel_format;

        state.with_stream_mut(|stream| {
            let (buf, meta) = stream.next().map_err(read_error)?;
            let used = (meta.bytesused as usize).min(buf.len());
            if used == 0 {
                return Err(CameraError::ReadFailed("driver returned an empty buffer".to_owned()));
            }
            let bytes = buf.get(..used).unwrap_or(buf);

            let data = match pixel_format.bytes_per_pixel() {
                Some(bpp) => pack_rows(
                    bytes,
                    format.stride as usize,
                    (format.width * bpp) as usize,
                    format.height as usize,
                )?,
                None => bytes.to_vec(),
            };

            // V4L2 timestamps are non-negative in practice
            #[allow(clippy::cast_sign_loss)]
            let secs = meta.timestamp.sec.max(0) as u64;
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            let nanos = (meta.timestamp.usec.max(0) as u32).saturating_mul(1000);

            Ok(Frame {
                data,
                width: format.width,
                height: format.height,
                pixel_format,
                metadata: FrameMetadata {
                    sequence: meta.sequence,
                    timestamp: Duration::new(secs, nanos),
                    bytes_used: meta.bytesused,
                },
            })
        })
    }

    fn release(&mut self) -> Result<()> {
        let Some(mut state) = self.state.take() else {
            return Ok(());
        };
        let stopped = state.with_stream_mut(|stream| stream.stop());
        drop(state);
        debug!("closed {}", self.path.display());
        stopped.map_err(|err| CameraError::StreamError(err.to_string()))
    }
}

fn open_failed(path: &Path, err: &io::Error) -> CameraError {
    CameraError::OpenFailed(format!("{}: {err}", path.display()))
}

fn read_error(err: io::Error) -> CameraError {
    match err.kind() {
        io::ErrorKind::TimedOut => CameraError::Timeout,
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => {
            CameraError::ReadFailed(err.to_string())
        }
        _ => CameraError::StreamError(err.to_string()),
    }
}

fn query_capabilities(device: &Device) -> io::Result<DeviceCapabilities> {
    let caps = device.query_caps()?;
    Ok(DeviceCapabilities {
        driver: caps.driver,
        card: caps.card,
        bus_info: caps.bus,
        can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
        can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
    })
}

/// Ask for `requested`; returns what the driver actually set.
fn set_format(device: &Device, requested: &Format) -> io::Result<Format> {
    let mut fmt = device.format()?;
    fmt.width = requested.width;
    fmt.height = requested.height;
    fmt.fourcc = requested.fourcc.into();

    let fmt = device.set_format(&fmt)?;
    Ok(Format {
        width: fmt.width,
        height: fmt.height,
        fourcc: FourCC::from(fmt.fourcc),
        stride: fmt.stride,
        size: fmt.size,
    })
}

/// One `/dev/video*` node as seen by [`list_devices`].
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Device index (`N` in `/dev/videoN`).
    pub index: u32,
    /// Device path.
    pub path: PathBuf,
    /// Name from sysfs, if present.
    pub name: Option<String>,
    /// Capabilities, or why they could not be queried.
    pub capabilities: std::result::Result<DeviceCapabilities, String>,
}

/// Describe `/dev/video0` .. `/dev/video{count-1}` that exist.
///
/// Uses sysfs for the node name so nodes are only opened for the
/// capability query.
pub fn list_devices(count: u32) -> Vec<DeviceInfo> {
    let video4linux = Path::new("/sys/class/video4linux");
    (0..count)
        .filter_map(|index| {
            let path = PathBuf::from(format!("/dev/video{index}"));
            if !path.exists() {
                return None;
            }
            let name = fs::read_to_string(video4linux.join(format!("video{index}")).join("name"))
                .ok()
                .map(|name| name.trim().to_owned());
            let capabilities = Device::with_path(&path)
                .and_then(|device| query_capabilities(&device))
                .map_err(|err| err.to_string());
            Some(DeviceInfo {
                index,
                path,
                name,
                capabilities,
            })
        })
        .collect()
}
