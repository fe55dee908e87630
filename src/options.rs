//! The option block: current scan geometry/resolution/source/colour mode,
//! and the "promised parameters" computation the facade exposes before a
//! scan starts.
//!
//! Kept as a plain, concrete struct rather than a pluggable trait since
//! there is exactly one implementation any embedder of this crate would
//! need.

use crate::geometry::{self, Fixed};
use crate::image::{Format, Parameters};
use crate::protocol::{Capabilities, ScanParams};

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub tl_x: Fixed,
    pub tl_y: Fixed,
    pub br_x: Fixed,
    pub br_y: Fixed,
    pub x_res: u32,
    pub y_res: u32,
    pub source: String,
    pub color_mode: String,
}

impl ScanOptions {
    /// Default window: the device's full platen at its advertised default
    /// resolution and first-listed source/colour mode.
    pub fn defaults(caps: &Capabilities) -> Self {
        ScanOptions {
            tl_x: 0,
            tl_y: 0,
            br_x: px_to_mm_fixed(caps.x_limits.max_len, caps.x_limits.units_dpi),
            br_y: px_to_mm_fixed(caps.y_limits.max_len, caps.y_limits.units_dpi),
            x_res: caps.default_x_res,
            y_res: caps.default_y_res,
            source: caps.sources.first().cloned().unwrap_or_default(),
            color_mode: caps.color_modes.first().cloned().unwrap_or_default(),
        }
    }

    /// The pixel format implied by the current colour mode string. eSCL
    /// devices advertise modes like `"BlackAndWhite1"`, `"Grayscale8"`,
    /// `"RGB24"`; anything not explicitly monochrome is treated as colour.
    pub fn format(&self) -> Format {
        let mode = self.color_mode.to_ascii_lowercase();
        if mode.contains("gray") || mode.contains("grey") || mode.contains("blackandwhite") || mode.contains("mono") {
            Format::Gray
        } else {
            Format::Rgb
        }
    }

    pub fn axes(&self, caps: &Capabilities) -> (geometry::Axis, geometry::Axis) {
        let x = geometry::compute_axis(self.tl_x, self.br_x, caps.x_limits, self.x_res);
        let y = geometry::compute_axis(self.tl_y, self.br_y, caps.y_limits, self.y_res);
        (x, y)
    }

    /// The geometry the frontend is promised: exactly this many pixels per
    /// line and lines, regardless of how the device clips or pads its own
    /// window.
    pub fn compute_parameters(&self, caps: &Capabilities, format: Format) -> Parameters {
        let (x, y) = self.axes(caps);
        let pixels_per_line =
            (geometry::rescale(x.len, caps.x_limits.units_dpi, self.x_res) - x.skip).max(0) as usize;
        let lines = (geometry::rescale(y.len, caps.y_limits.units_dpi, self.y_res) - y.skip).max(0) as usize;
        let bpp = match format {
            Format::Gray => 1,
            Format::Rgb => 3,
        };
        Parameters { format, pixels_per_line, lines, bytes_per_line: pixels_per_line * bpp }
    }

    pub fn to_scan_params(&self, caps: &Capabilities) -> ScanParams {
        let (x, y) = self.axes(caps);
        ScanParams {
            x_off: x.off,
            y_off: y.off,
            width: x.len,
            height: y.len,
            x_res: self.x_res,
            y_res: self.y_res,
            source: self.source.clone(),
            color_mode: self.color_mode.clone(),
        }
    }
}

fn px_to_mm_fixed(px: i64, dpi: u32) -> Fixed {
    const MM_PER_INCH: f64 = 25.4;
    ((px as f64) * MM_PER_INCH / dpi as f64 * 65536.0).round() as Fixed
}
