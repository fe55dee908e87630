//! Status taxonomy exposed at the frontend facade boundary.
//!
//! Internal plumbing (HTTP, XML decode, discovery) uses `anyhow::Error` with
//! `.context(...)`, the way the rest of this crate's ambient stack does;
//! `Status` is the small, closed set of kinds the facade actually reports to
//! callers, matching the meanings a SANE-style frontend expects.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Operation completed successfully.
    #[error("good")]
    Good,
    /// Misuse: wrong state for the requested operation, or malformed
    /// geometry.
    #[error("invalid argument")]
    Inval,
    /// `open` while the device is already open.
    #[error("device busy")]
    DeviceBusy,
    /// Allocation failure while opening a device.
    #[error("out of memory")]
    NoMem,
    /// Transport or decode failure surfaced to the reader.
    #[error("I/O error")]
    IoError,
    /// The scanner rejected the request outright (e.g. HTTP 401/403).
    #[error("access denied")]
    AccessDenied,
    /// The scanner understood the request but doesn't support what was
    /// asked (e.g. HTTP 501, or a capability outside the advertised range).
    #[error("unsupported")]
    Unsupported,
    /// Cooperative cancel observed by the reader.
    #[error("operation cancelled")]
    Cancelled,
    /// Internal sentinel: the reader drains remaining buffered bytes before
    /// surfacing this to the caller.
    #[error("end of file")]
    Eof,
}

impl Status {
    pub fn is_error(self) -> bool {
        !matches!(self, Status::Good)
    }
}

pub type Result<T> = std::result::Result<T, Status>;
