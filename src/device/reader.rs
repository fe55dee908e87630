//! Streaming image reader: pulls decoded images off the job's queue, clips
//! each to the promised geometry, and exposes a lazy line sequence
//! honouring blocking/non-blocking mode.

use std::sync::Arc;

use crate::error::Status;
use crate::image::ImageWindow;

use super::{stm, Device, Inner, ReaderState, StmState};

/// Begin decoding the next queued image. Caller must hold the device lock
/// and have already confirmed the queue is non-empty.
fn read_next(device: &Arc<Device>, inner: &mut Inner) -> Result<(), Status> {
    let blob = inner.image_queue.pop_front().ok_or(Status::Eof)?;
    if inner.decoder.is_none() {
        if let Some(registry) = device.registry.upgrade() {
            inner.decoder = Some(registry.new_decoder());
        }
    }
    let decoder = inner.decoder.as_mut().expect("decoder must be installed before reading");
    decoder.begin(&blob).map_err(|_| Status::IoError)?;
    let decoded = decoder.get_params();

    let opts = inner.options.as_ref().expect("scan options required while reading");
    let caps = inner.caps.as_ref().expect("capabilities required while reading");
    let promised = opts.compute_parameters(caps, decoded.format);
    if decoded.format != promised.format {
        return Err(Status::IoError);
    }

    let bpp = decoder.get_bytes_per_pixel();
    let skip_x = inner.skip_x.max(0) as usize;
    let skip_y = inner.skip_y.max(0) as usize;

    let (read_skip_lines, read_skip_bytes, line_end, line_capacity);
    if skip_x >= decoded.pixels_per_line || skip_y >= decoded.lines {
        // Neither axis leaves anything worth decoding: the whole image is
        // skip residual.
        read_skip_lines = decoded.lines;
        read_skip_bytes = 0;
        line_end = 0;
        line_capacity = promised.bytes_per_line;
    } else {
        let window_h = decoded.lines - skip_y;
        let window = ImageWindow { x: skip_x, y: skip_y, w: decoded.pixels_per_line - skip_x, h: window_h };
        let committed = decoder.set_window(window).map_err(|_| Status::IoError)?;
        // The decoder may snap the window to a coarser origin than asked;
        // compensate on X with a byte offset into each decoded line, and
        // on Y by skipping whole lines outright.
        let x_diff = window.x.saturating_sub(committed.x);
        let y_diff = window.y.saturating_sub(committed.y);
        read_skip_bytes = x_diff * bpp;
        read_skip_lines = y_diff;
        line_end = window_h - read_skip_lines;
        line_capacity = promised.bytes_per_line.max(committed.w * bpp);
    }

    inner.reader = Some(ReaderState {
        promised_bytes_per_line: promised.bytes_per_line,
        promised_lines: promised.lines,
        decoder_bytes_per_pixel: bpp,
        line_buf: vec![0xFFu8; line_capacity],
        line_off: promised.bytes_per_line,
        line_num: 0,
        read_skip_lines,
        read_skip_bytes,
        line_end,
    });
    device.pollable.signal();
    Ok(())
}

fn decode_line(inner: &mut Inner) -> Result<(), Status> {
    let (line_num, read_skip_lines, line_end, promised_lines) = {
        let r = inner.reader.as_ref().expect("reader state required to decode a line");
        (r.line_num, r.read_skip_lines, r.line_end, r.promised_lines)
    };

    if line_num == promised_lines {
        return Err(Status::Eof);
    }

    if line_num < read_skip_lines || line_num >= line_end {
        inner.reader.as_mut().unwrap().line_buf.fill(0xFF);
    } else {
        let reader = inner.reader.as_mut().expect("reader state required to decode a line");
        let decoder = inner.decoder.as_mut().expect("decoder must be installed to decode a line");
        decoder.read_line(&mut reader.line_buf).map_err(|_| Status::IoError)?;
    }

    let reader = inner.reader.as_mut().unwrap();
    reader.line_off = reader.read_skip_bytes;
    reader.line_num += 1;
    Ok(())
}

/// Frontend `read` entry point.
pub fn read(device: &Arc<Device>, buf: &mut [u8]) -> Result<usize, Status> {
    let mut inner = device.lock.lock().unwrap();
    if !inner.flags.reading() {
        return Err(Status::Inval);
    }

    if inner.reader.is_none() {
        if inner.image_queue.is_empty() && device.state().is_working() {
            if inner.nonblocking {
                return Ok(0);
            }
            while inner.image_queue.is_empty() && device.state().is_working() {
                inner = device.cond.wait(inner).unwrap();
            }
        }
        if inner.job_status == Status::Cancelled {
            finish_read(device, &mut inner);
            return Err(Status::Cancelled);
        }
        if inner.image_queue.is_empty() {
            // A clean job (nothing ever went wrong) surfaces EOF once
            // there's nothing left to stream; any other status is the
            // job's actual terminal error.
            let status = if inner.job_status == Status::Good { Status::Eof } else { inner.job_status };
            finish_read(device, &mut inner);
            return Err(status);
        }
        if let Err(status) = read_next(device, &mut inner) {
            finish_read(device, &mut inner);
            return Err(status);
        }
    }

    let mut written = 0usize;
    let mut status = Status::Good;
    while written < buf.len() {
        let (line_off, bytes_per_line, line_num, promised_lines) = {
            let r = inner.reader.as_ref().unwrap();
            (r.line_off, r.promised_bytes_per_line, r.line_num, r.promised_lines)
        };
        if line_off == bytes_per_line {
            if line_num == promised_lines {
                status = Status::Eof;
                break;
            }
            if let Err(e) = decode_line(&mut inner) {
                status = e;
                break;
            }
            continue;
        }
        let n = (bytes_per_line - line_off).min(buf.len() - written);
        let reader = inner.reader.as_mut().unwrap();
        buf[written..written + n].copy_from_slice(&reader.line_buf[line_off..line_off + n]);
        reader.line_off += n;
        written += n;
    }

    if status == Status::IoError {
        inner.job_status = Status::IoError;
        drop(inner);
        stm::request_cancel_on_reader_error(device);
        inner = device.lock.lock().unwrap();
    }

    // The reader may be fully exhausted either because the loop above hit
    // internal EOF directly, or because the caller's buffer happened to
    // end exactly on the image's last byte (so the loop exited on the
    // `written < buf.len()` check without ever re-checking position).
    // Either way, drop it now so the next call falls through to
    // `inner.reader.is_none()` above and pops the next queued image,
    // rather than re-entering the decode loop against a reader already
    // sitting at its own EOF.
    if inner.reader.as_ref().is_some_and(|r| r.line_num == r.promised_lines && r.line_off == r.promised_bytes_per_line) {
        inner.reader = None;
    }

    // An EOF that coincides with delivered bytes is reported as GOOD so the
    // next call observes EOF cleanly.
    let returned = if status == Status::Eof && written > 0 { Status::Good } else { status };

    if returned != Status::Good {
        finish_read(device, &mut inner);
    }

    if returned.is_error() {
        Err(returned)
    } else {
        Ok(written)
    }
}

fn finish_read(device: &Arc<Device>, inner: &mut Inner) {
    inner.flags.set_scanning(false);
    inner.flags.set_reading(false);
    if let Some(decoder) = inner.decoder.as_mut() {
        decoder.reset();
    }
    inner.reader = None;
    if device.state() == StmState::Done && inner.image_queue.is_empty() {
        device.set_state_locked(inner, StmState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eloop::EventLoop;
    use crate::geometry::AxisLimits;
    use crate::image::mock::MockDecoder;
    use crate::image::Format;
    use crate::options::ScanOptions;
    use crate::protocol::Capabilities;

    fn caps() -> Capabilities {
        Capabilities {
            x_limits: AxisLimits { min_len: 1, max_len: 8, units_dpi: 300 },
            y_limits: AxisLimits { min_len: 1, max_len: 4, units_dpi: 300 },
            default_x_res: 300,
            default_y_res: 300,
            sources: vec!["Platen".into()],
            color_modes: vec!["Color".into()],
            vendor: None,
            model: None,
        }
    }

    fn setup(skip_x: i64, skip_y: i64) -> Arc<Device> {
        let eloop = Arc::new(EventLoop::new());
        let device = Device::new("test", eloop).unwrap();
        let caps = caps();
        let mut inner = device.lock.lock().unwrap();
        inner.caps = Some(caps.clone());
        inner.options = Some(ScanOptions::defaults(&caps));
        inner.decoder = Some(Box::new(MockDecoder::new()));
        inner.skip_x = skip_x;
        inner.skip_y = skip_y;
        inner.flags.set_reading(true);
        let image = MockDecoder::encode(8, 4, Format::Gray, 0x42);
        inner.image_queue.push_back(image);
        drop(inner);
        device.state.store(StmState::Done as u8, std::sync::atomic::Ordering::SeqCst);
        device
    }

    #[test]
    fn reads_full_image_with_no_skip() {
        let device = setup(0, 0);
        let mut buf = vec![0u8; 8 * 4];
        let n = read(&device, &mut buf).unwrap();
        assert_eq!(n, 32);
        assert!(buf.iter().all(|&b| b == 0x42));
    }

    #[test]
    fn clamped_window_is_trimmed_without_padding() {
        // A minimum-window clamp shrinks the promised image and the
        // decoder is asked to crop the same residual away; the delivered
        // bytes are all real decoded data, no 0xFF filler.
        let mut caps = caps();
        caps.x_limits = AxisLimits { min_len: 6, max_len: 16, units_dpi: 300 };
        let mut opts = ScanOptions::defaults(&caps);
        opts.br_x = opts.tl_x + ((2.0_f64 * 25.4 / 300.0 * 65536.0).round() as crate::geometry::Fixed);
        let (x, y) = opts.axes(&caps);
        assert_eq!(x.len, 6);
        assert_eq!(x.skip, 4);
        assert_eq!(y.skip, 0);

        let eloop = Arc::new(EventLoop::new());
        let device = Device::new("test", eloop).unwrap();
        let mut inner = device.lock.lock().unwrap();
        inner.skip_x = x.skip;
        inner.skip_y = y.skip;
        inner.caps = Some(caps);
        inner.options = Some(opts);
        inner.decoder = Some(Box::new(MockDecoder::new()));
        inner.flags.set_reading(true);
        // The scanner already cropped to the clamped 6x4 window.
        inner.image_queue.push_back(MockDecoder::encode(6, 4, Format::Gray, 0x7A));
        drop(inner);
        device.state.store(StmState::Done as u8, std::sync::atomic::Ordering::SeqCst);

        let mut buf = vec![0u8; 64];
        let n = read(&device, &mut buf).unwrap();
        assert_eq!(n, 8); // promised pixels_per_line=2, lines=4
        assert!(buf[..n].iter().all(|&b| b == 0x7A));
    }

    #[test]
    fn decoder_snap_compensates_with_byte_offset() {
        let caps = caps();
        let opts = ScanOptions::defaults(&caps);
        let eloop = Arc::new(EventLoop::new());
        let device = Device::new("test", eloop).unwrap();
        let mut inner = device.lock.lock().unwrap();
        inner.skip_x = 1; // ask the decoder to start at x=1
        inner.skip_y = 0;
        inner.caps = Some(caps);
        inner.options = Some(opts);
        let mut decoder = MockDecoder::new();
        decoder.snap_x_to = 4; // can only start windows on x=0,4,8,...
        inner.decoder = Some(Box::new(decoder));
        inner.flags.set_reading(true);
        inner.image_queue.push_back(MockDecoder::encode(8, 4, Format::Gray, 0x11));
        drop(inner);
        device.state.store(StmState::Done as u8, std::sync::atomic::Ordering::SeqCst);

        let mut buf = vec![0u8; 64];
        let n = read(&device, &mut buf).unwrap();
        // Decoder snapped x=1 down to x=0: one extra column of real data
        // is captured, compensated by a 1-byte leading skip per line.
        let inner = device.lock.lock().unwrap();
        assert!(inner.reader.is_none()); // read fully drained, teardown ran
        drop(inner);
        assert_eq!(n, 7 * 4); // promised pixels_per_line = 8-1=7, 4 lines
        assert!(buf[..n].iter().all(|&b| b == 0x11));
    }

    #[test]
    fn fully_skipped_axis_yields_all_0xff() {
        let device = setup(8, 0);
        let mut buf = vec![0u8; 32];
        let n = read(&device, &mut buf).unwrap();
        assert!(buf[..n].iter().all(|&b| b == 0xFF));
    }
}
