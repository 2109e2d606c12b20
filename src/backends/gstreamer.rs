//! GStreamer backend: `<source> ! videoconvert ! videoscale ! caps ! appsink`.

use gstreamer::prelude::*;
use gstreamer::{ClockTime, MessageView, State};
use gstreamer_app::AppSink;
use log::{debug, info};
use std::time::Duration;

use crate::config::{BackendDescriptor, BackendKind};
use crate::frame::{pack_rows, Frame, FrameMetadata};
use crate::traits::{CameraError, CaptureBackend, CaptureSource, PixelFormat, Result};

const SINK_NAME: &str = "probe_sink";

/// Builds and plays a pipeline ending in an appsink.
pub struct GstreamerBackend {
    descriptor: BackendDescriptor,
}

impl GstreamerBackend {
    /// Backend for a GStreamer descriptor.
    pub const fn new(descriptor: BackendDescriptor) -> Self {
        Self { descriptor }
    }
}

/// Full launch line for `descriptor`, or `None` if it is not a GStreamer descriptor.
pub fn pipeline_description(descriptor: &BackendDescriptor) -> Option<String> {
    let BackendKind::Gstreamer { source } = descriptor.kind() else {
        return None;
    };
    let (width, height) = (descriptor.width(), descriptor.height());
    let sink = format!("appsink name={SINK_NAME} sync=false max-buffers=1 drop=true");

    let description = match descriptor.pixel_format() {
        PixelFormat::Mjpeg => format!(
            "{source} ! videoconvert ! videoscale ! video/x-raw,width={width},height={height} \
             ! jpegenc ! image/jpeg ! {sink}"
        ),
        raw => format!(
            "{source} ! videoconvert ! videoscale \
             ! video/x-raw,format={},width={width},height={height} ! {sink}",
            raw_caps_format(raw)
        ),
    };
    Some(description)
}

const fn raw_caps_format(format: PixelFormat) -> &'static str {
    match format {
        PixelFormat::Rgb24 => "RGB",
        PixelFormat::Yuyv => "YUY2",
        PixelFormat::Grey => "GRAY8",
        PixelFormat::Bgr24 | PixelFormat::Mjpeg => "BGR",
    }
}

impl CaptureBackend for GstreamerBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn open(&mut self) -> Result<Box<dyn CaptureSource>> {
        let description = pipeline_description(&self.descriptor).ok_or_else(|| {
            CameraError::OpenFailed(format!(
                "{} is not a GStreamer descriptor",
                self.descriptor.label()
            ))
        })?;
        gstreamer::init()
            .map_err(|err| CameraError::OpenFailed(format!("gstreamer init: {err}")))?;
        debug!("gst-launch: {description}");

        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|err| CameraError::OpenFailed(format!("build pipeline: {err}")))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| CameraError::OpenFailed("launch line is not a pipeline".to_owned()))?;
        let appsink = pipeline
            .by_name(SINK_NAME)
            .and_then(|element| element.downcast::<AppSink>().ok())
            .ok_or_else(|| CameraError::OpenFailed("appsink missing from pipeline".to_owned()))?;

        let mut source = GstreamerSource {
            pipeline,
            appsink,
            pixel_format: self.descriptor.pixel_format(),
            timeout: self.descriptor.timeout(),
            sequence: 0,
            released: false,
        };
        if let Err(err) = source.start() {
            // never handed out, so nobody else will release it
            let _ = source.release();
            return Err(err);
        }
        info!("playing {description}");
        Ok(Box::new(source))
    }
}

/// A playing pipeline.
pub struct GstreamerSource {
    pipeline: gstreamer::Pipeline,
    appsink: AppSink,
    pixel_format: PixelFormat,
    timeout: Duration,
    sequence: u32,
    released: bool,
}

impl GstreamerSource {
    fn start(&mut self) -> Result<()> {
        self.pipeline
            .set_state(State::Playing)
            .map_err(|err| CameraError::OpenFailed(format!("set Playing: {err}")))?;

        let (change, _, _) = self.pipeline.state(to_clock_time(self.timeout));
        if change.is_err() {
            let reason = self
                .bus_error()
                .unwrap_or_else(|| "pipeline did not reach Playing".to_owned());
            return Err(CameraError::OpenFailed(reason));
        }
        Ok(())
    }

    /// Drain the bus; returns the first error or EOS found.
    fn bus_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        let mut first = None;
        while let Some(message) = bus.timed_pop(ClockTime::ZERO) {
            let found = match message.view() {
                MessageView::Error(err) => Some(format!(
                    "error from {}: {} ({})",
                    err.src()
                        .map_or_else(|| "pipeline".into(), |src| src.path_string().to_string()),
                    err.error(),
                    err.debug().map(|debug| debug.to_string()).unwrap_or_default()
                )),
                MessageView::Eos(..) => Some("end of stream".to_owned()),
                _ => None,
            };
            if first.is_none() {
                first = found;
            }
        }
        first
    }

    fn sample_to_frame(&mut self, sample: &gstreamer::Sample) -> Result<Frame> {
        let buffer = sample
            .buffer()
            .ok_or_else(|| CameraError::ReadFailed("sample without buffer".to_owned()))?;
        let caps = sample
            .caps()
            .ok_or_else(|| CameraError::ReadFailed("sample without caps".to_owned()))?;
        let map = buffer
            .map_readable()
            .map_err(|err| CameraError::ReadFailed(format!("map buffer: {err}")))?;
        let timestamp = buffer
            .pts()
            .map_or(Duration::ZERO, |pts| Duration::from_nanos(pts.nseconds()));

        let (data, width, height) = if self.pixel_format == PixelFormat::Mjpeg {
            let structure = caps
                .structure(0)
                .ok_or_else(|| CameraError::ReadFailed("empty caps".to_owned()))?;
            let dimension = |field: &str| -> Result<u32> {
                structure
                    .get::<i32>(field)
                    .ok()
                    .and_then(|value| u32::try_from(value).ok())
                    .ok_or_else(|| CameraError::ReadFailed(format!("caps missing {field}")))
            };
            (map.as_slice().to_vec(), dimension("width")?, dimension("height")?)
        } else {
            let info = gstreamer_video::VideoInfo::from_caps(caps)
                .map_err(|err| CameraError::ReadFailed(format!("parse caps: {err}")))?;
            let bpp = self.pixel_format.bytes_per_pixel().unwrap_or(3);
            let stride = info
                .stride()
                .first()
                .and_then(|&stride| usize::try_from(stride).ok())
                .unwrap_or((info.width() * bpp) as usize);
            let data = pack_rows(
                map.as_slice(),
                stride,
                (info.width() * bpp) as usize,
                info.height() as usize,
            )?;
            (data, info.width(), info.height())
        };

        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        Ok(Frame {
            data,
            width,
            height,
            pixel_format: self.pixel_format,
            metadata: FrameMetadata {
                sequence,
                timestamp,
                bytes_used: u32::try_from(map.size()).unwrap_or(u32::MAX),
            },
        })
    }
}

impl CaptureSource for GstreamerSource {
    fn read_frame(&mut self) -> Result<Frame> {
        if let Some(reason) = self.bus_error() {
            return Err(CameraError::StreamError(reason));
        }
        match self.appsink.try_pull_sample(to_clock_time(self.timeout)) {
            Some(sample) => self.sample_to_frame(&sample),
            None if self.appsink.is_eos() => {
                Err(CameraError::StreamError("end of stream".to_owned()))
            }
            None => Err(CameraError::Timeout),
        }
    }

    fn release(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.released, true) {
            return Ok(());
        }
        self.pipeline
            .set_state(State::Null)
            .map(|_| ())
            .map_err(|err| CameraError::StreamError(format!("set Null: {err}")))
    }
}

fn to_clock_time(duration: Duration) -> ClockTime {
    ClockTime::from_nseconds(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX))
}
