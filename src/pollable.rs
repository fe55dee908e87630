//! A pollable readiness signal: a selectable file descriptor that becomes
//! readable after `signal()` and is cleared by `reset()`.
//!
//! Backed by a Unix-domain socket pair (a classic self-pipe), so a caller
//! driving a `select`/`poll` loop can wait on `get_fd()` for new image data
//! without busy-polling the device lock.

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Mutex;

pub struct Pollable {
    reader: UnixStream,
    writer: Mutex<UnixStream>,
}

impl Pollable {
    pub fn new() -> io::Result<Self> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;
        Ok(Pollable { reader, writer: Mutex::new(writer) })
    }

    /// Make the pollable's fd readable. Idempotent: signalling an
    /// already-signalled pollable does not grow the backing buffer.
    pub fn signal(&self) {
        if !self.is_signalled() {
            let mut writer = self.writer.lock().unwrap();
            let _ = writer.write_all(&[1u8]);
        }
    }

    /// Clear readiness. Safe to call when not currently signalled.
    pub fn reset(&self) {
        let mut buf = [0u8; 64];
        let mut reader = &self.reader;
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
    }

    pub fn get_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    fn is_signalled(&self) -> bool {
        // `UnixStream::peek` is still gated behind the unstable
        // `unix_socket_peek` feature on this toolchain, so peek via a raw
        // `recv(MSG_PEEK)` instead; semantics are identical (inspect without
        // consuming).
        let mut buf = [0u8; 1];
        let n = unsafe {
            libc::recv(
                self.reader.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                libc::MSG_PEEK,
            )
        };
        n > 0
    }
}
