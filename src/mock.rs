//! Scripted backends for testing without hardware.

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use crate::config::BackendDescriptor;
use crate::frame::{Frame, FrameMetadata};
use crate::traits::{CameraError, CaptureBackend, CaptureSource, PixelFormat, Result};

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

/// What a single scripted read does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStep {
    /// Deliver a frame.
    Frame,
    /// Transient miss (`Timeout`).
    Miss,
    /// Non-transient stream error.
    Fail,
    /// Panic inside the read.
    Panic,
}

/// Outcomes for successive reads; exhausted scripts keep missing.
#[derive(Debug, Clone)]
pub struct ReadScript {
    steps: VecDeque<ReadStep>,
    repeat: bool,
}

impl ReadScript {
    /// `.` frame, `x` miss, `!` stream error, `p` panic.
    pub fn new(script: &str) -> Self {
        let steps = script
            .chars()
            .filter_map(|c| match c {
                '.' => Some(ReadStep::Frame),
                'x' => Some(ReadStep::Miss),
                '!' => Some(ReadStep::Fail),
                'p' => Some(ReadStep::Panic),
                _ => None,
            })
            .collect();
        Self {
            steps,
            repeat: false,
        }
    }

    /// Replay the script forever instead of missing once it runs out.
    #[must_use]
    pub const fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }

    fn next_step(&mut self) -> ReadStep {
        let step = self.steps.pop_front().unwrap_or(ReadStep::Miss);
        if self.repeat {
            self.steps.push_back(step);
        }
        step
    }
}

/// Shared call counters, readable after the source has been moved away.
#[derive(Debug, Clone, Default)]
pub struct SourceCounters {
    opens: Rc<Cell<usize>>,
    reads: Rc<Cell<usize>>,
    releases: Rc<Cell<usize>>,
}

impl SourceCounters {
    /// Successful and failed `open` calls.
    pub fn opens(&self) -> usize {
        self.opens.get()
    }

    /// `read_frame` calls.
    pub fn reads(&self) -> usize {
        self.reads.get()
    }

    /// `release` calls.
    pub fn releases(&self) -> usize {
        self.releases.get()
    }
}

fn bump(counter: &Cell<usize>) {
    counter.set(counter.get() + 1);
}

/// Mock backend that either refuses to open or hands out a scripted source.
pub struct MockBackend {
    descriptor: BackendDescriptor,
    script: Option<ReadScript>,
    open_error: fn() -> CameraError,
    counters: SourceCounters,
}

fn refused() -> CameraError {
    CameraError::OpenFailed("mock device refused to open".to_owned())
}

impl MockBackend {
    /// Backend whose source follows `script`.
    pub fn new(descriptor: BackendDescriptor, script: ReadScript) -> Self {
        Self {
            descriptor,
            script: Some(script),
            open_error: refused,
            counters: SourceCounters::default(),
        }
    }

    /// Backend whose `open` always fails with `OpenFailed`.
    pub fn failing(descriptor: BackendDescriptor) -> Self {
        Self::failing_with(descriptor, refused)
    }

    /// Backend whose `open` always fails with the error `make` builds.
    pub fn failing_with(descriptor: BackendDescriptor, make: fn() -> CameraError) -> Self {
        Self {
            descriptor,
            script: None,
            open_error: make,
            counters: SourceCounters::default(),
        }
    }

    /// Counters shared with every source this backend opens.
    pub fn counters(&self) -> SourceCounters {
        self.counters.clone()
    }
}

impl CaptureBackend for MockBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn open(&mut self) -> Result<Box<dyn CaptureSource>> {
        bump(&self.counters.opens);
        let script = self
            .script
            .clone()
            .ok_or_else(self.open_error)?;
        let source = MockSource::new(script, self.counters.clone()).with_format(
            self.descriptor.width().min(64),
            self.descriptor.height().min(48),
            self.descriptor.pixel_format(),
        );
        Ok(Box::new(source))
    }
}

/// Mock capture source for testing.
pub struct MockSource {
    script: ReadScript,
    counters: SourceCounters,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    pattern: TestPattern,
    fail_release: bool,
    frame_count: u32,
}

impl MockSource {
    /// 16x8 YUYV color bars following `script`.
    pub fn new(script: ReadScript, counters: SourceCounters) -> Self {
        Self {
            script,
            counters,
            width: 16,
            height: 8,
            pixel_format: PixelFormat::Yuyv,
            pattern: TestPattern::ColorBars,
            fail_release: false,
            frame_count: 0,
        }
    }

    /// Set the frame geometry and layout.
    #[must_use]
    pub const fn with_format(mut self, width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        self.width = width;
        self.height = height;
        self.pixel_format = pixel_format;
        self
    }

    /// Set the test pattern for frame generation.
    #[must_use]
    pub const fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Make `release` report an error (it is still counted).
    #[must_use]
    pub const fn failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }
}

impl CaptureSource for MockSource {
    #[allow(clippy::panic)]
    fn read_frame(&mut self) -> Result<Frame> {
        bump(&self.counters.reads);
        match self.script.next_step() {
            ReadStep::Frame => {
                let frame = generate_frame(
                    self.width,
                    self.height,
                    self.pixel_format,
                    self.pattern,
                    self.frame_count,
                );
                self.frame_count += 1;
                Ok(frame)
            }
            ReadStep::Miss => Err(CameraError::Timeout),
            ReadStep::Fail => Err(CameraError::StreamError("mock device unplugged".to_owned())),
            ReadStep::Panic => panic!("mock read panicked"),
        }
    }

    fn release(&mut self) -> Result<()> {
        bump(&self.counters.releases);
        if self.fail_release {
            return Err(CameraError::StreamError("mock release failed".to_owned()));
        }
        Ok(())
    }
}

/// Generate a frame of the given layout showing `pattern`.
pub fn generate_frame(
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    pattern: TestPattern,
    sequence: u32,
) -> Frame {
    let yuyv = Frame {
        data: generate_yuyv(width, height, pattern),
        width,
        height,
        pixel_format: PixelFormat::Yuyv,
        metadata: FrameMetadata {
            sequence,
            timestamp: Duration::from_millis(u64::from(sequence) * 33), // ~30fps
            bytes_used: width * height * 2,
        },
    };
    if pixel_format == PixelFormat::Yuyv {
        return yuyv;
    }

    let rgb = yuyv.to_rgb_image().expect("mock YUYV frame converts");
    let data = match pixel_format {
        PixelFormat::Rgb24 | PixelFormat::Yuyv => rgb.into_raw(),
        PixelFormat::Bgr24 => rgb
            .pixels()
            .flat_map(|px| [px.0[2], px.0[1], px.0[0]])
            .collect(),
        PixelFormat::Grey => yuyv.data.iter().step_by(2).copied().collect(),
        PixelFormat::Mjpeg => {
            let mut jpeg = Vec::new();
            rgb.write_to(&mut std::io::Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
                .expect("mock JPEG encodes");
            jpeg
        }
    };

    Frame {
        data,
        pixel_format,
        ..yuyv
    }
}

/// Generate YUYV data for `pattern`.
fn generate_yuyv(width: u32, height: u32, pattern: TestPattern) -> Vec<u8> {
    let size = (width * height * 2) as usize; // YUYV = 2 bytes/pixel
    let mut data = vec![0u8; size];

    match pattern {
        TestPattern::ColorBars => generate_color_bars(&mut data, width, height),
        TestPattern::Gradient => generate_gradient(&mut data, width, height),
        TestPattern::Solid(y, u, v) => generate_solid(&mut data, y, u, v),
    }

    data
}

/// Generate YUYV color bars pattern.
fn generate_color_bars(data: &mut [u8], width: u32, height: u32) {
    // White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    let bars: [(u8, u8, u8); 8] = [
        (235, 128, 128),
        (210, 16, 146),
        (170, 166, 16),
        (145, 54, 34),
        (106, 202, 222),
        (81, 90, 240),
        (41, 240, 110),
        (16, 128, 128),
    ];

    let bar_width = (width / 8).max(1);

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let bar_idx = (x / bar_width).min(7) as usize;
            let (y_val, u_val, v_val) = bars[bar_idx];
            let offset = ((y * width + x) * 2) as usize;
            if let Some(px) = data.get_mut(offset..offset + 4) {
                px.copy_from_slice(&[y_val, u_val, y_val, v_val]);
            }
        }
    }
}

/// Generate YUYV horizontal gradient pattern.
fn generate_gradient(data: &mut [u8], width: u32, height: u32) {
    for y in 0..height {
        for x in (0..width).step_by(2) {
            #[allow(clippy::cast_possible_truncation)]
            let y_val = ((x * 255) / width) as u8;
            let offset = ((y * width + x) * 2) as usize;
            if let Some(px) = data.get_mut(offset..offset + 4) {
                px.copy_from_slice(&[y_val, 128, y_val, 128]);
            }
        }
    }
}

/// Generate solid color YUYV frame.
fn generate_solid(data: &mut [u8], y: u8, u: u8, v: u8) {
    for px in data.chunks_exact_mut(4) {
        px.copy_from_slice(&[y, u, y, v]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_backend_open_and_read() {
        let mut backend = MockBackend::new(BackendDescriptor::v4l2(0), ReadScript::new(".x!"));
        let counters = backend.counters();
        let mut source = backend.open().expect("open should succeed");

        let frame = source.read_frame().expect("first read delivers a frame");
        assert_eq!(frame.metadata.sequence, 0);
        assert!(!frame.data.is_empty());

        assert!(matches!(source.read_frame(), Err(CameraError::Timeout)));
        assert!(matches!(source.read_frame(), Err(CameraError::StreamError(_))));
        // exhausted scripts keep missing
        assert!(matches!(source.read_frame(), Err(CameraError::Timeout)));

        source.release().expect("release should succeed");
        assert_eq!((counters.opens(), counters.reads(), counters.releases()), (1, 4, 1));
    }

    #[test]
    fn test_failing_backend_never_hands_out_a_source() {
        let mut backend = MockBackend::failing(BackendDescriptor::libcamera(0));
        assert!(matches!(backend.open(), Err(CameraError::OpenFailed(_))));
        assert_eq!(backend.counters().opens(), 1);
        assert_eq!(backend.counters().releases(), 0);
    }

    #[test]
    fn test_repeating_script() {
        let mut script = ReadScript::new(".x").repeating();
        let steps: Vec<_> = (0..5).map(|_| script.next_step()).collect();
        assert_eq!(
            steps,
            [ReadStep::Frame, ReadStep::Miss, ReadStep::Frame, ReadStep::Miss, ReadStep::Frame]
        );
    }

    #[test]
    fn test_color_bars_pattern() {
        let data = generate_yuyv(640, 480, TestPattern::ColorBars);
        assert_eq!(data.len(), 640 * 480 * 2);
        // First bar should be white (Y=235)
        assert_eq!(data[0], 235);
    }

    #[test]
    fn test_gradient_pattern() {
        let data = generate_yuyv(640, 480, TestPattern::Gradient);
        assert!(data[0] < 10);
        let last_row_start = 479 * 640 * 2;
        assert!(data[last_row_start + 638 * 2] > 200);
    }

    #[test]
    fn test_generated_layouts() {
        for format in PixelFormat::ALL {
            let frame = generate_frame(16, 8, format, TestPattern::Solid(128, 64, 192), 3);
            assert_eq!(frame.pixel_format, format);
            assert_eq!(frame.metadata.sequence, 3);
            if let Some(len) = frame.expected_len() {
                assert_eq!(frame.data.len(), len, "{format} length");
            }
            let rgb = frame.to_rgb_image().expect("generated frame converts");
            assert_eq!(rgb.dimensions(), (16, 8));
        }
    }
}
