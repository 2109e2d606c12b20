//! Captured frames and conversion to displayable RGB.

use image::{ImageFormat, RgbImage};
use std::path::Path;
use std::time::Duration;

use crate::traits::{CameraError, PixelFormat, Result};

/// Metadata for a captured frame.
#[derive(Debug, Clone, Default)]
pub struct FrameMetadata {
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Actual bytes used in the frame buffer.
    pub bytes_used: u32,
}

/// A captured video frame.
///
/// Packed formats carry no row padding; backends strip it before
/// constructing the frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw frame data.
    pub data: Vec<u8>,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Memory layout of `data`.
    pub pixel_format: PixelFormat,
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

impl Frame {
    /// Bytes a packed frame of this geometry must hold, `None` for MJPEG.
    #[must_use]
    pub fn expected_len(&self) -> Option<usize> {
        self.pixel_format
            .bytes_per_pixel()
            .map(|bpp| self.width as usize * self.height as usize * bpp as usize)
    }

    /// Get RGB values for a pixel at the specified coordinates.
    ///
    /// Returns `None` for out-of-bounds coordinates and for compressed frames.
    /// For YUYV, odd x coordinates use the second luma sample of the pair
    /// with the shared U/V values.
    #[must_use]
    pub fn pixel_at(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = (y * self.width + x) as usize;

        match self.pixel_format {
            PixelFormat::Rgb24 => {
                let px = self.data.get(index * 3..index * 3 + 3)?;
                Some((*px.first()?, *px.get(1)?, *px.get(2)?))
            }
            PixelFormat::Bgr24 => {
                let px = self.data.get(index * 3..index * 3 + 3)?;
                Some((*px.get(2)?, *px.get(1)?, *px.first()?))
            }
            PixelFormat::Grey => {
                let luma = *self.data.get(index)?;
                Some((luma, luma, luma))
            }
            PixelFormat::Yuyv => {
                // [Y0 U Y1 V] per pixel pair
                let offset = ((y * self.width + (x & !1)) * 2) as usize;
                let y_val = if x % 2 == 0 {
                    *self.data.get(offset)?
                } else {
                    *self.data.get(offset + 2)?
                };
                let u = *self.data.get(offset + 1)?;
                let v = *self.data.get(offset + 3)?;
                Some(yuv_to_rgb(y_val, u, v))
            }
            PixelFormat::Mjpeg => None,
        }
    }

    /// Convert the frame to an RGB image for display or JPEG output.
    ///
    /// BGR frames are always swapped to RGB here; there is no policy knob.
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        if self.pixel_format == PixelFormat::Mjpeg {
            let decoded = image::load_from_memory_with_format(&self.data, ImageFormat::Jpeg)?;
            return Ok(decoded.into_rgb8());
        }

        let expected = self.expected_len().unwrap_or_default();
        let data = self.data.get(..expected).ok_or_else(|| {
            CameraError::ReadFailed(format!(
                "{} frame too short: got {} bytes, expected {expected} for {}x{}",
                self.pixel_format,
                self.data.len(),
                self.width,
                self.height
            ))
        })?;

        let rgb = match self.pixel_format {
            PixelFormat::Rgb24 => data.to_vec(),
            PixelFormat::Bgr24 => data
                .chunks_exact(3)
                .flat_map(|px| px.iter().rev().copied())
                .collect(),
            PixelFormat::Grey => data.iter().flat_map(|&luma| [luma, luma, luma]).collect(),
            PixelFormat::Yuyv => yuyv_to_rgb(data),
            PixelFormat::Mjpeg => Vec::new(),
        };

        RgbImage::from_raw(self.width, self.height, rgb).ok_or_else(|| {
            CameraError::StreamError(format!(
                "RGB buffer does not match {}x{}",
                self.width, self.height
            ))
        })
    }

    /// Write the frame as a JPEG, converting to RGB first.
    pub fn save_jpeg(&self, path: &Path) -> Result<()> {
        self.to_rgb_image()?.save_with_format(path, ImageFormat::Jpeg)?;
        Ok(())
    }
}

/// Copy `height` rows of `row_bytes` out of a buffer whose rows are `stride` apart.
pub fn pack_rows(data: &[u8], stride: usize, row_bytes: usize, height: usize) -> Result<Vec<u8>> {
    if stride == row_bytes {
        return data
            .get(..row_bytes * height)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| short_buffer(data.len(), row_bytes * height));
    }

    let mut packed = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * stride;
        let line = data
            .get(start..start + row_bytes)
            .ok_or_else(|| short_buffer(data.len(), (height - 1) * stride + row_bytes))?;
        packed.extend_from_slice(line);
    }
    Ok(packed)
}

fn short_buffer(got: usize, expected: usize) -> CameraError {
    CameraError::ReadFailed(format!("buffer too short: got {got} bytes, expected {expected}"))
}

fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for chunk in data.chunks_exact(4) {
        if let [y0, u, y1, v] = *chunk {
            let (r, g, b) = yuv_to_rgb(y0, u, v);
            rgb.extend_from_slice(&[r, g, b]);
            let (r, g, b) = yuv_to_rgb(y1, u, v);
            rgb.extend_from_slice(&[r, g, b]);
        }
    }
    rgb
}

/// Convert YUV values to RGB.
///
/// Uses the ITU-R BT.601 conversion formula, clamped to 0-255.
#[must_use]
#[allow(clippy::many_single_char_names)]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let clamp = |val: f32| -> u8 { val.clamp(0.0, 255.0) as u8 };

    (clamp(r), clamp(g), clamp(b))
}
