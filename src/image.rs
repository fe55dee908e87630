//! Image decoder contract (external collaborator, consumed only).
//!
//! The core never interprets JPEG/PNG bytes itself; it drives a decoder
//! through this trait and trusts the decoded line data and parameters it
//! reports. A `mock` implementation is provided for the crate's own tests.

use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Gray,
    Rgb,
}

/// Promised/decoded geometry, in the spirit of `SANE_Parameters`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameters {
    pub format: Format,
    pub pixels_per_line: usize,
    pub lines: usize,
    pub bytes_per_line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageWindow {
    pub x: usize,
    pub y: usize,
    pub w: usize,
    pub h: usize,
}

/// A single in-progress decode of one scanned image.
pub trait ImageDecoder: Send {
    /// Begin decoding a new image from its encoded bytes.
    fn begin(&mut self, bytes: &[u8]) -> Result<()>;

    /// Parameters of the image as it stands after `begin` (and, once
    /// called, after `set_window`).
    fn get_params(&self) -> Parameters;

    fn get_bytes_per_pixel(&self) -> usize;

    /// Ask the decoder to only emit `window`. The decoder may snap the
    /// window to a coarser origin (e.g. to a block boundary); the window it
    /// actually committed to is returned.
    fn set_window(&mut self, window: ImageWindow) -> Result<ImageWindow>;

    /// Decode one more line into `buf` (sized to `get_params().bytes_per_line`
    /// or larger).
    fn read_line(&mut self, buf: &mut [u8]) -> Result<()>;

    fn content_type(&self) -> &'static str;

    /// Release any in-progress decode state so the decoder can `begin` again.
    fn reset(&mut self);
}

#[cfg(any(test, feature = "mock-decoder"))]
pub mod mock {
    use super::*;

    /// A trivial decoder whose "encoded bytes" are just a little header
    /// followed by raw pixel rows, used by the crate's own scenario tests.
    pub struct MockDecoder {
        width: usize,
        height: usize,
        format: Format,
        rows: Vec<Vec<u8>>,
        window: Option<ImageWindow>,
        next_row: usize,
        /// Simulates a decoder that can only start windows on even-x
        /// boundaries, to exercise the snap-compensation path.
        pub snap_x_to: usize,
    }

    impl MockDecoder {
        pub fn new() -> Self {
            MockDecoder {
                width: 0,
                height: 0,
                format: Format::Gray,
                rows: Vec::new(),
                window: None,
                next_row: 0,
                snap_x_to: 1,
            }
        }

        /// Encode an image as `width(u32le) height(u32le) format(u8) rows...`.
        pub fn encode(width: usize, height: usize, format: Format, fill: u8) -> Vec<u8> {
            let bpp = match format {
                Format::Gray => 1,
                Format::Rgb => 3,
            };
            let mut out = Vec::new();
            out.extend_from_slice(&(width as u32).to_le_bytes());
            out.extend_from_slice(&(height as u32).to_le_bytes());
            out.push(match format {
                Format::Gray => 0,
                Format::Rgb => 1,
            });
            out.resize(out.len() + width * height * bpp, fill);
            out
        }
    }

    impl Default for MockDecoder {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ImageDecoder for MockDecoder {
        fn begin(&mut self, bytes: &[u8]) -> Result<()> {
            anyhow::ensure!(bytes.len() >= 9, "truncated mock image");
            let width = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
            let height = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
            let format = match bytes[8] {
                0 => Format::Gray,
                1 => Format::Rgb,
                _ => anyhow::bail!("bad format byte"),
            };
            let bpp = self_bpp(format);
            let pixels = &bytes[9..];
            anyhow::ensure!(pixels.len() == width * height * bpp, "size mismatch");
            self.rows = pixels.chunks(width * bpp).map(|r| r.to_vec()).collect();
            self.width = width;
            self.height = height;
            self.format = format;
            self.window = None;
            self.next_row = 0;
            Ok(())
        }

        fn get_params(&self) -> Parameters {
            let (w, h) = match self.window {
                Some(win) => (win.w, win.h),
                None => (self.width, self.height),
            };
            let bpp = self.get_bytes_per_pixel();
            Parameters { format: self.format, pixels_per_line: w, lines: h, bytes_per_line: w * bpp }
        }

        fn get_bytes_per_pixel(&self) -> usize {
            self_bpp(self.format)
        }

        fn set_window(&mut self, mut window: ImageWindow) -> Result<ImageWindow> {
            if self.snap_x_to > 1 {
                let snapped = (window.x / self.snap_x_to) * self.snap_x_to;
                window.w += window.x - snapped;
                window.x = snapped;
            }
            window.w = window.w.min(self.width.saturating_sub(window.x));
            window.h = window.h.min(self.height.saturating_sub(window.y));
            self.window = Some(window);
            self.next_row = window.y;
            Ok(window)
        }

        fn read_line(&mut self, buf: &mut [u8]) -> Result<()> {
            let win = self.window.unwrap_or(ImageWindow { x: 0, y: 0, w: self.width, h: self.height });
            anyhow::ensure!(self.next_row < win.y + win.h, "read past end of image");
            let bpp = self.get_bytes_per_pixel();
            let row = &self.rows[self.next_row];
            let start = win.x * bpp;
            let end = start + win.w * bpp;
            buf[..win.w * bpp].copy_from_slice(&row[start..end]);
            self.next_row += 1;
            Ok(())
        }

        fn content_type(&self) -> &'static str {
            "image/x-mock"
        }

        fn reset(&mut self) {
            self.rows.clear();
            self.window = None;
            self.next_row = 0;
        }
    }

    fn self_bpp(format: Format) -> usize {
        match format {
            Format::Gray => 1,
            Format::Rgb => 3,
        }
    }
}
