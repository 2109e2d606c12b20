//! Terminal preview display and keyboard cancellation.
//!
//! Frames are drawn with Unicode upper half blocks: the foreground colour is
//! the upper pixel, the background colour the lower one, which doubles the
//! vertical resolution of a character cell.

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::style::{Color, Print, ResetColor, SetBackgroundColor, SetForegroundColor};
use crossterm::terminal::{
    self, disable_raw_mode, enable_raw_mode, Clear, ClearType, EnterAlternateScreen,
    LeaveAlternateScreen,
};
use crossterm::{execute, queue};
use image::RgbImage;
use std::io::{self, Stdout, Write};
use std::time::Duration;

use crate::preview::{CancelSignal, FrameDisplay};
use crate::traits::Result;

/// Full-screen half-block renderer on stdout.
pub struct TerminalDisplay {
    stdout: Stdout,
    frames: u64,
    active: bool,
}

impl TerminalDisplay {
    /// Switch the terminal to raw mode and the alternate screen.
    pub fn new() -> Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        if let Err(err) = execute!(stdout, EnterAlternateScreen, Hide, Clear(ClearType::All)) {
            let _ = disable_raw_mode();
            return Err(err.into());
        }
        Ok(Self {
            stdout,
            frames: 0,
            active: true,
        })
    }
}

impl FrameDisplay for TerminalDisplay {
    fn show(&mut self, image: &RgbImage) -> Result<()> {
        let (cols, rows) = terminal::size()?;
        let cols = u32::from(cols.max(1));
        // bottom line is the status bar
        let cell_rows = u32::from(rows.saturating_sub(1).max(1));
        let (out_w, out_h) = fit(image.dimensions(), (cols, cell_rows * 2));

        for cell_row in 0..out_h.div_ceil(2) {
            queue!(self.stdout, MoveTo(0, to_u16(cell_row)))?;
            for x in 0..out_w {
                let top = sample(image, x, cell_row * 2, out_w, out_h);
                let bottom = sample(image, x, cell_row * 2 + 1, out_w, out_h);
                queue!(
                    self.stdout,
                    SetForegroundColor(top),
                    SetBackgroundColor(bottom),
                    Print('\u{2580}')
                )?;
            }
            queue!(self.stdout, ResetColor)?;
        }

        self.frames += 1;
        let (width, height) = image.dimensions();
        queue!(
            self.stdout,
            MoveTo(0, to_u16(cell_rows)),
            Clear(ClearType::CurrentLine),
            Print(format!(
                "frame {} | {width}x{height} | q/Esc to quit",
                self.frames
            ))
        )?;
        self.stdout.flush()?;
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        if !std::mem::replace(&mut self.active, false) {
            return Ok(());
        }
        let screen = execute!(self.stdout, ResetColor, Show, LeaveAlternateScreen);
        disable_raw_mode()?;
        screen?;
        Ok(())
    }
}

impl Drop for TerminalDisplay {
    fn drop(&mut self) {
        let _ = self.teardown();
    }
}

/// Scale `(w, h)` to fit `(max_w, max_h)` keeping the aspect ratio.
fn fit((w, h): (u32, u32), (max_w, max_h): (u32, u32)) -> (u32, u32) {
    if w == 0 || h == 0 {
        return (0, 0);
    }
    let (w64, h64) = (u64::from(w), u64::from(h));
    let (max_w64, max_h64) = (u64::from(max_w), u64::from(max_h));
    let (out_w, out_h) = if w64 * max_h64 <= h64 * max_w64 {
        (w64 * max_h64 / h64, max_h64)
    } else {
        (max_w64, h64 * max_w64 / w64)
    };
    (
        u32::try_from(out_w.clamp(1, max_w64)).unwrap_or(max_w),
        u32::try_from(out_h.clamp(1, max_h64)).unwrap_or(max_h),
    )
}

/// Nearest-neighbour sample of output pixel `(x, y)`; black past the edge.
fn sample(image: &RgbImage, x: u32, y: u32, out_w: u32, out_h: u32) -> Color {
    if y >= out_h {
        return Color::Black;
    }
    let (w, h) = image.dimensions();
    let src_x = (u64::from(x) * u64::from(w) / u64::from(out_w.max(1))).min(u64::from(w) - 1);
    let src_y = (u64::from(y) * u64::from(h) / u64::from(out_h.max(1))).min(u64::from(h) - 1);
    image
        .get_pixel_checked(
            u32::try_from(src_x).unwrap_or(0),
            u32::try_from(src_y).unwrap_or(0),
        )
        .map_or(Color::Black, |px| Color::Rgb {
            r: px.0[0],
            g: px.0[1],
            b: px.0[2],
        })
}

fn to_u16(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

/// Cancels on `q`, `Esc` or `Ctrl+C` (raw mode swallows SIGINT).
#[derive(Debug, Default)]
pub struct KeyboardCancel;

impl CancelSignal for KeyboardCancel {
    fn cancelled(&mut self) -> Result<bool> {
        while event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                let ctrl_c =
                    key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL);
                if ctrl_c || matches!(key.code, KeyCode::Char('q' | 'Q') | KeyCode::Esc) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_keeps_aspect_ratio() {
        // 640x480 into 80 columns, 2*23 half-rows: height-limited
        assert_eq!(fit((640, 480), (80, 46)), (61, 46));
        // wide terminal, width-limited
        assert_eq!(fit((640, 480), (40, 100)), (40, 30));
        assert_eq!(fit((0, 480), (80, 46)), (0, 0));
        assert_eq!(fit((1, 1), (80, 46)), (46, 46));
    }

    #[test]
    fn test_sample_edges() {
        let mut image = RgbImage::new(2, 2);
        image.put_pixel(0, 0, image::Rgb([255, 0, 0]));
        image.put_pixel(1, 1, image::Rgb([0, 0, 255]));

        assert_eq!(sample(&image, 0, 0, 4, 4), Color::Rgb { r: 255, g: 0, b: 0 });
        assert_eq!(sample(&image, 3, 3, 4, 4), Color::Rgb { r: 0, g: 0, b: 255 });
        assert_eq!(sample(&image, 0, 4, 4, 4), Color::Black);
    }

    #[test]
    fn test_to_u16_saturates() {
        assert_eq!(to_u16(12), 12);
        assert_eq!(to_u16(70_000), u16::MAX);
    }
}
