//! Frontend-millimetre to protocol-pixel window conversion.
//!
//! Scanners only accept scan windows at or above their own minimum size, in
//! pixels at their native ("units") resolution, while the frontend works in
//! fixed-point millimetres. This module maps one to the other and records how
//! many image pixels of the decoded frame must be discarded so the frontend
//! still sees exactly the geometry it asked for.

const MM_PER_INCH: f64 = 25.4;

/// Fixed-point millimetres, following the common convention of
/// `millimetres * 65536`.
pub type Fixed = i32;

pub fn fixed_to_mm(v: Fixed) -> f64 {
    v as f64 / 65536.0
}

/// Convert a fixed-point millimetre length to pixels at `dpi`, rounding to
/// the nearest pixel.
pub fn mm_to_px(mm_fixed: Fixed, dpi: u32) -> i64 {
    (fixed_to_mm(mm_fixed) * dpi as f64 / MM_PER_INCH).round() as i64
}

/// Result of clipping one axis of the requested window to the device's
/// capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Axis {
    /// Offset to request from the device, in protocol (units-dpi) pixels.
    pub off: i64,
    /// Length to request from the device, in protocol (units-dpi) pixels.
    pub len: i64,
    /// Pixels to discard from the front of the decoded image, rescaled to
    /// the scan resolution (the resolution the image is actually decoded
    /// at), so the frontend sees exactly its requested pixel count.
    pub skip: i64,
}

/// The device's supported window range for one axis, in protocol pixels at
/// `units_dpi`.
#[derive(Debug, Clone, Copy)]
pub struct AxisLimits {
    pub min_len: i64,
    pub max_len: i64,
    pub units_dpi: u32,
}

/// Compute the protocol-pixel window for one axis.
///
/// `tl`/`br` are the frontend's requested top-left/bottom-right in
/// fixed-point millimetres; `res_dpi` is the resolution the scan will be
/// decoded at (may differ from `units_dpi`, the device's native grid).
pub fn compute_axis(tl: Fixed, br: Fixed, limits: AxisLimits, res_dpi: u32) -> Axis {
    let requested = mm_to_px(br - tl, limits.units_dpi).max(0);
    let floor = limits.min_len.max(1);
    let len = requested.clamp(floor, limits.max_len);

    let mut off = mm_to_px(tl, limits.units_dpi).max(0);
    let overflow = (off + len - limits.max_len).max(0);
    off -= overflow;

    // Pixels captured beyond what the frontend actually asked for: the
    // clamp-up to the device minimum, plus any leftward shift performed to
    // keep the window inside the device's maximum.
    let skip_units = (len - requested) + overflow;
    let skip = rescale(skip_units, limits.units_dpi, res_dpi);

    Axis { off, len, skip }
}

/// Rescale a protocol-pixel count from one DPI domain to another, rounding
/// to the nearest pixel. Exposed for callers (e.g. the option block) that
/// need to express a device-domain length in the frontend's resolution.
pub fn rescale(value: i64, from_dpi: u32, to_dpi: u32) -> i64 {
    if from_dpi == to_dpi {
        value
    } else {
        ((value as f64) * to_dpi as f64 / from_dpi as f64).round() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mm(v: f64) -> Fixed {
        (v * 65536.0).round() as Fixed
    }

    #[test]
    fn clamps_to_device_minimum_and_reports_skip() {
        // S6: device min=600, max=2550 units-px at 300 dpi; frontend's
        // requested window works out to 100 units-px; image decoded at 600
        // dpi (double the protocol's native grid).
        let limits = AxisLimits { min_len: 600, max_len: 2550, units_dpi: 300 };
        // Choose tl/br in mm so that mm_to_px(br-tl, 300) == 100.
        let tl = mm(0.0);
        let br = mm(100.0 * MM_PER_INCH / 300.0);
        let axis = compute_axis(tl, br, limits, 600);
        assert_eq!(axis.off, 0);
        assert_eq!(axis.len, 600);
        assert_eq!(axis.skip, 1000);
    }

    #[test]
    fn no_clamp_needed_has_zero_skip() {
        let limits = AxisLimits { min_len: 100, max_len: 2550, units_dpi: 300 };
        let tl = mm(0.0);
        let br = mm(200.0 * MM_PER_INCH / 300.0);
        let axis = compute_axis(tl, br, limits, 300);
        assert_eq!(axis.len, 200);
        assert_eq!(axis.skip, 0);
    }

    #[test]
    fn round_trip_law_holds_without_maxlen_overflow() {
        // Property from the spec: minlen <= len <= maxlen, off+len <=
        // maxlen, and when there is no maxlen-driven shift, len - skip
        // (in units-domain) equals the originally requested pixel count.
        let limits = AxisLimits { min_len: 600, max_len: 2550, units_dpi: 300 };
        for requested_mm in [0.0, 5.0, 20.0, 60.0] {
            let tl = mm(10.0);
            let br = mm(10.0 + requested_mm);
            let axis = compute_axis(tl, br, limits, 300);
            assert!(axis.len >= limits.min_len);
            assert!(axis.len <= limits.max_len);
            assert!(axis.off + axis.len <= limits.max_len);
            let requested_units = mm_to_px(br - tl, limits.units_dpi).max(0);
            assert_eq!(axis.len - axis.skip, requested_units);
        }
    }

    #[test]
    fn maxlen_overflow_shifts_offset_left() {
        let limits = AxisLimits { min_len: 1, max_len: 1000, units_dpi: 300 };
        let tl = mm(900.0 * MM_PER_INCH / 300.0);
        let br = mm((900.0 + 200.0) * MM_PER_INCH / 300.0);
        let axis = compute_axis(tl, br, limits, 300);
        assert_eq!(axis.len, 200);
        assert!(axis.off + axis.len <= limits.max_len);
        assert_eq!(axis.off, 800);
        assert_eq!(axis.skip, 100);
    }
}
