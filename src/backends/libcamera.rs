//! Native libcamera backend.
//!
//! libcamera objects borrow from their `CameraManager` and must stay on one
//! thread, so a capture thread owns the whole session and hands finished
//! frames over a bounded channel.

use libcamera::{
    camera_manager::CameraManager,
    framebuffer::AsFrameBuffer,
    framebuffer_allocator::{FrameBuffer, FrameBufferAllocator},
    framebuffer_map::MemoryMappedFrameBuffer,
    geometry::Size,
    pixel_format::PixelFormat as LibcameraPixelFormat,
    request::{Request, ReuseFlag},
    stream::StreamRole,
};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::{BackendDescriptor, BackendKind};
use crate::frame::{pack_rows, Frame, FrameMetadata};
use crate::traits::{CameraError, CaptureBackend, CaptureSource, PixelFormat, Result};

/// How often the capture thread checks the stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

type MappedBuffer = MemoryMappedFrameBuffer<FrameBuffer>;

/// libcamera camera by enumeration index.
pub struct LibcameraBackend {
    descriptor: BackendDescriptor,
}

impl LibcameraBackend {
    /// Backend for a libcamera descriptor.
    pub const fn new(descriptor: BackendDescriptor) -> Self {
        Self { descriptor }
    }
}

/// What the capture thread settled on.
#[derive(Debug, Clone, Copy)]
struct StreamLayout {
    width: u32,
    height: u32,
    stride: u32,
}

/// libcamera fourcc for a pixel format; byte order follows DRM naming.
const fn fourcc(format: PixelFormat) -> [u8; 4] {
    match format {
        PixelFormat::Bgr24 => *b"RG24",
        PixelFormat::Rgb24 => *b"BG24",
        PixelFormat::Yuyv => *b"YUYV",
        PixelFormat::Mjpeg => *b"MJPG",
        PixelFormat::Grey => *b"R8  ",
    }
}

impl CaptureBackend for LibcameraBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn open(&mut self) -> Result<Box<dyn CaptureSource>> {
        let BackendKind::Libcamera { camera } = *self.descriptor.kind() else {
            return Err(CameraError::OpenFailed(format!(
                "{} is not a libcamera descriptor",
                self.descriptor.label()
            )));
        };

        let request = CaptureRequest {
            camera,
            width: self.descriptor.width(),
            height: self.descriptor.height(),
            pixel_format: self.descriptor.pixel_format(),
        };
        let pixel_format = request.pixel_format;
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let (frame_tx, frame_rx) = mpsc::sync_channel(1);

        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(format!("libcamera{camera}"))
            .spawn(move || capture_thread(&request, &ready_tx, &frame_tx, &thread_stop))?;

        let mut source = LibcameraSource {
            frames: frame_rx,
            stop,
            handle: Some(handle),
            pixel_format,
            timeout: self.descriptor.timeout(),
        };

        // libcamera startup includes sensor probing, so allow a few timeouts
        let startup = self.descriptor.timeout().saturating_mul(3);
        let ready = match ready_rx.recv_timeout(startup) {
            Ok(ready) => ready,
            Err(RecvTimeoutError::Timeout) => Err(CameraError::OpenFailed(format!(
                "camera {camera} did not start within {startup:?}"
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(CameraError::OpenFailed(format!(
                "capture thread for camera {camera} exited during startup"
            ))),
        };

        match ready {
            Ok(layout) => {
                info!(
                    "libcamera camera {camera} streaming {}x{} {} (stride {})",
                    layout.width, layout.height, pixel_format, layout.stride
                );
                Ok(Box::new(source))
            }
            Err(err) => {
                let _ = source.release();
                Err(err)
            }
        }
    }
}

struct CaptureRequest {
    camera: usize,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

/// Body of the capture thread. Reports startup through `ready`, then
/// delivers frames until `stop` is set or the receiver goes away.
fn capture_thread(
    request: &CaptureRequest,
    ready: &SyncSender<Result<StreamLayout>>,
    frames: &SyncSender<Result<Frame>>,
    stop: &AtomicBool,
) {
    let mut ready_sent = false;
    let result = stream_frames(request, frames, stop, |layout| {
        ready_sent = true;
        let _ = ready.send(Ok(layout));
    });
    if let Err(err) = result {
        if ready_sent {
            let _ = frames.try_send(Err(err));
        } else {
            let _ = ready.send(Err(err));
        }
    }
}

fn init_failed<E: std::fmt::Display>(step: &str, err: E) -> CameraError {
    CameraError::OpenFailed(format!("libcamera {step}: {err}"))
}

fn stream_frames<F: FnOnce(StreamLayout)>(
    request: &CaptureRequest,
    frames: &SyncSender<Result<Frame>>,
    stop: &AtomicBool,
    on_ready: F,
) -> Result<()> {
    let manager = CameraManager::new().map_err(|err| init_failed("camera manager", err))?;
    let cameras = manager.cameras();
    let camera = cameras.get(request.camera).ok_or_else(|| {
        CameraError::OpenFailed(format!(
            "libcamera sees {} camera(s), no index {}",
            cameras.len(),
            request.camera
        ))
    })?;
    debug!("libcamera camera {} is {}", request.camera, camera.id());
    let mut camera = camera.acquire().map_err(|err| init_failed("acquire", err))?;

    let mut configs = camera
        .generate_configuration(&[StreamRole::ViewFinder])
        .ok_or_else(|| CameraError::OpenFailed("libcamera generated no configuration".into()))?;
    let wanted = LibcameraPixelFormat::new(u32::from_le_bytes(fourcc(request.pixel_format)), 0);
    {
        let mut config = configs
            .get_mut(0)
            .ok_or_else(|| CameraError::OpenFailed("no stream configuration".into()))?;
        config.set_pixel_format(wanted);
        config.set_size(Size {
            width: request.width,
            height: request.height,
        });
    }
    let status = configs.validate();
    if status.is_invalid() {
        return Err(CameraError::OpenFailed(format!(
            "libcamera rejected {}x{} {}",
            request.width, request.height, request.pixel_format
        )));
    }
    camera
        .configure(&mut configs)
        .map_err(|err| init_failed("configure", err))?;

    let config = configs
        .get(0)
        .ok_or_else(|| CameraError::OpenFailed("no stream configuration".into()))?;
    if config.get_pixel_format() != wanted {
        return Err(CameraError::UnsupportedFormat(format!(
            "libcamera cannot deliver {}",
            request.pixel_format
        )));
    }
    let size = config.get_size();
    let layout = StreamLayout {
        width: size.width,
        height: size.height,
        stride: config.get_stride(),
    };
    let stream = config
        .stream()
        .ok_or_else(|| CameraError::OpenFailed("configured stream missing".into()))?;

    let mut allocator = FrameBufferAllocator::new(&camera);
    let buffers = allocator
        .alloc(&stream)
        .map_err(|err| init_failed("allocate buffers", err))?;
    let mut requests = Vec::with_capacity(buffers.len());
    for (cookie, buffer) in (0u64..).zip(buffers) {
        let buffer = MemoryMappedFrameBuffer::new(buffer).map_err(|err| init_failed("mmap", err))?;
        let mut req = camera
            .create_request(Some(cookie))
            .ok_or_else(|| CameraError::OpenFailed("libcamera create_request failed".into()))?;
        req.add_buffer(&stream, buffer)
            .map_err(|err| init_failed("add buffer", err))?;
        requests.push(req);
    }

    let (completed_tx, completed_rx) = mpsc::channel::<Request>();
    camera.on_request_completed(move |req| {
        let _ = completed_tx.send(req);
    });
    camera.start(None).map_err(|err| init_failed("start", err))?;
    for req in requests {
        if let Err((_, err)) = camera.queue_request(req) {
            let _ = camera.stop();
            return Err(init_failed("queue request", err));
        }
    }
    on_ready(layout);

    while !stop.load(Ordering::Relaxed) {
        let mut req = match completed_rx.recv_timeout(POLL_INTERVAL) {
            Ok(req) => req,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let frame = req
            .buffer::<MappedBuffer>(&stream)
            .ok_or_else(|| CameraError::ReadFailed("request without frame buffer".into()))
            .and_then(|buffer| copy_frame(buffer, layout, request.pixel_format));

        match frames.try_send(frame) {
            // queue full: the waiting frame stays and this one is dropped
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => break,
        }

        req.reuse(ReuseFlag::REUSE_BUFFERS);
        if let Err((_, err)) = camera.queue_request(req) {
            warn!("libcamera requeue failed: {err}");
            let _ = frames.try_send(Err(CameraError::StreamError(format!("requeue: {err}"))));
            break;
        }
    }

    camera.stop().map_err(|err| CameraError::StreamError(format!("stop: {err}")))?;
    debug!("libcamera camera {} stopped", request.camera);
    Ok(())
}

fn copy_frame(
    buffer: &MappedBuffer,
    layout: StreamLayout,
    pixel_format: PixelFormat,
) -> Result<Frame> {
    let planes = buffer.data();
    let plane = planes
        .first()
        .ok_or_else(|| CameraError::ReadFailed("frame buffer has no planes".into()))?;
    let metadata = buffer.metadata();
    let bytes_used = metadata
        .as_ref()
        .and_then(|meta| meta.planes().get(0).map(|p| p.bytes_used as usize))
        .unwrap_or(plane.len())
        .min(plane.len());
    if bytes_used == 0 {
        return Err(CameraError::ReadFailed("empty frame buffer".into()));
    }
    let bytes = plane.get(..bytes_used).unwrap_or(plane);

    let data = match pixel_format.bytes_per_pixel() {
        Some(bpp) => {
            let row_bytes = (layout.width * bpp) as usize;
            let stride = if layout.stride > 0 {
                layout.stride as usize
            } else {
                bytes_used / (layout.height as usize).max(1)
            };
            pack_rows(bytes, stride, row_bytes, layout.height as usize)?
        }
        None => bytes.to_vec(),
    };

    Ok(Frame {
        data,
        width: layout.width,
        height: layout.height,
        pixel_format,
        metadata: FrameMetadata {
            sequence: metadata.as_ref().map_or(0, |meta| meta.sequence()),
            timestamp: Duration::from_nanos(metadata.as_ref().map_or(0, |meta| meta.timestamp())),
            bytes_used: u32::try_from(bytes_used).unwrap_or(u32::MAX),
        },
    })
}

/// Frames handed over by the capture thread.
pub struct LibcameraSource {
    frames: Receiver<Result<Frame>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    pixel_format: PixelFormat,
    timeout: Duration,
}

impl CaptureSource for LibcameraSource {
    fn read_frame(&mut self) -> Result<Frame> {
        if self.handle.is_none() {
            return Err(CameraError::StreamError("libcamera source released".into()));
        }
        match self.frames.recv_timeout(self.timeout) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => Err(CameraError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(CameraError::StreamError(format!(
                "libcamera capture thread ended ({})",
                self.pixel_format
            ))),
        }
    }

    fn release(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.stop.store(true, Ordering::Relaxed);
        handle
            .join()
            .map_err(|_| CameraError::StreamError("libcamera capture thread panicked".into()))
    }
}
