//! Frontend API facade: the synchronous surface an embedding shim (e.g. a
//! SANE backend) calls into. `DeviceManager` is process-wide; `DeviceHandle`
//! is one `open`ed device.
//!
//! Every call here is a synchronous, blocking wrapper over the
//! asynchronously-running job state machine: a frontend call blocks on a
//! condvar while the event-loop thread drives the actual work, with an
//! explicit cancel handle for walking away early.

use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use crate::device::registry::Registry;
use crate::device::{stm, Device, Flags, StmState};
use crate::error::Status;
use crate::image::Parameters;
use crate::options::ScanOptions;

/// Wall-clock deadline `list`/`open` block on waiting for discovery's
/// initial scan and every device's probe to settle.
const READY_TIMEOUT: Duration = Duration::from_secs(5);

fn ready_mask() -> Flags {
    let mut f = Flags::default();
    f.set_listed(true);
    f.set_ready(true);
    f
}

/// One entry in `DeviceManager::list`'s result.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub device_type: String,
}

/// Process-wide entry point: enumerate and open devices.
pub struct DeviceManager {
    registry: Arc<Registry>,
}

impl DeviceManager {
    pub fn new(registry: Arc<Registry>) -> Self {
        DeviceManager { registry }
    }

    /// Block up to the readiness timeout, then return every READY, LISTED
    /// device sorted by name.
    pub fn list(&self) -> Vec<DeviceInfo> {
        self.registry.wait_ready(READY_TIMEOUT);
        let mut devices = self.registry.collect(ready_mask());
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        devices
            .into_iter()
            .map(|d| {
                let inner = d.lock.lock().unwrap();
                let proto_name = inner.adapter.as_ref().map(|a| a.name()).unwrap_or("unknown");
                DeviceInfo {
                    name: d.name.clone(),
                    vendor: inner.caps.as_ref().and_then(|c| c.vendor.clone()),
                    model: inner.caps.as_ref().and_then(|c| c.model.clone()),
                    device_type: format!("{proto_name} network scanner"),
                }
            })
            .collect()
    }

    /// Wait for readiness, then open `name` (or the first ready device, if
    /// `name` is empty). Fails `DEVICE_BUSY` if the device is not CLOSED.
    pub fn open(&self, name: &str) -> Result<DeviceHandle, Status> {
        self.registry.wait_ready(READY_TIMEOUT);
        let device = if name.is_empty() {
            self.registry.collect(ready_mask()).into_iter().next().ok_or(Status::Inval)?
        } else {
            self.registry.find(name).ok_or(Status::Inval)?
        };
        if !device.cas_state(StmState::Closed, StmState::Idle) {
            return Err(Status::DeviceBusy);
        }
        let cancel_event = stm::make_cancel_event(device.clone());
        {
            let mut inner = device.lock.lock().unwrap();
            inner.cancel_event = Some(cancel_event);
        }
        device.incref();
        Ok(DeviceHandle { device })
    }
}

/// One `open`ed device. Dropping this value without calling `close` leaks
/// the reference count the same way leaking a file descriptor would; the
/// shim layer is expected to pair every `open` with a `close`.
pub struct DeviceHandle {
    device: Arc<Device>,
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle").field("device", &self.device.name).finish()
    }
}

impl DeviceHandle {
    /// Cancel any working job (synchronously), release the cancel event,
    /// return to CLOSED, and drop the open reference.
    pub fn close(&self) {
        let mut inner = self.device.lock.lock().unwrap();
        if self.device.state() != StmState::Closed {
            if self.device.state().is_working() {
                drop(inner);
                stm::cancel_req(&self.device);
                inner = self.device.lock.lock().unwrap();
                inner = self.device.cond.wait_while(inner, |_| self.device.state().is_working()).unwrap();
            }
            inner.cancel_event = None;
            self.device.set_state_locked(&mut inner, StmState::Closed);
        }
        drop(inner);
        self.device.decref();
    }

    /// Start a scan. Rejects if the device is already SCANNING or if the
    /// promised geometry is degenerate (zero pixels or lines).
    pub fn start(&self) -> Result<(), Status> {
        let mut inner = self.device.lock.lock().unwrap();
        if inner.flags.scanning() {
            return Err(Status::DeviceBusy);
        }
        let caps = inner.caps.clone().ok_or(Status::Inval)?;
        let opts = inner.options.clone().ok_or(Status::Inval)?;
        let params = opts.compute_parameters(&caps, opts.format());
        if params.pixels_per_line == 0 || params.lines == 0 {
            return Err(Status::Inval);
        }

        inner.flags.set_scanning(true);
        self.device.pollable.reset();
        inner.nonblocking = false;

        if self.device.state().is_working() && !inner.image_queue.is_empty() {
            inner.flags.set_reading(true);
            return Ok(());
        }

        inner.job_status = Status::Good;
        inner.job_location = None;
        inner.failed_attempt = 0;
        inner.job_images_received = 0;
        self.device.set_state_locked(&mut inner, StmState::Idle);
        drop(inner);

        let dev2 = self.device.clone();
        self.device.eloop.call(move || stm::start_scan(&dev2));

        let mut inner = self.device.lock.lock().unwrap();
        inner = self.device.cond.wait_while(inner, |_| self.device.state() == StmState::Idle).unwrap();
        inner.flags.set_reading(true);
        Ok(())
    }

    /// Cooperative, asynchronous cancel request. Never blocks.
    pub fn cancel(&self) {
        stm::cancel_req(&self.device);
    }

    /// Read up to `buf.len()` bytes of the current scan's image stream.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, Status> {
        crate::device::reader::read(&self.device, buf)
    }

    /// Only while SCANNING: flip the reader between blocking and
    /// non-blocking mode.
    pub fn set_io_mode(&self, nonblocking: bool) -> Result<(), Status> {
        let mut inner = self.device.lock.lock().unwrap();
        if !inner.flags.scanning() {
            return Err(Status::Inval);
        }
        inner.nonblocking = nonblocking;
        Ok(())
    }

    /// Only while SCANNING: the pollable fd a `select`/`poll` loop can wait
    /// on for read readiness.
    pub fn get_select_fd(&self) -> Result<RawFd, Status> {
        let inner = self.device.lock.lock().unwrap();
        if !inner.flags.scanning() {
            return Err(Status::Inval);
        }
        Ok(self.device.pollable.get_fd())
    }

    /// Thin delegate to the option block. This crate's option model is a
    /// single concrete `ScanOptions` value rather than a per-option
    /// descriptor table (see `options.rs`), so `get_option`/`set_option`/
    /// `get_option_descriptor` collapse to whole-struct get/set here.
    pub fn get_options(&self) -> Result<ScanOptions, Status> {
        self.device.lock.lock().unwrap().options.clone().ok_or(Status::Inval)
    }

    /// Rejected while SCANNING, per §4.8.
    pub fn set_options(&self, options: ScanOptions) -> Result<(), Status> {
        let mut inner = self.device.lock.lock().unwrap();
        if inner.flags.scanning() {
            return Err(Status::DeviceBusy);
        }
        inner.options = Some(options);
        Ok(())
    }

    pub fn get_parameters(&self) -> Result<Parameters, Status> {
        let inner = self.device.lock.lock().unwrap();
        let caps = inner.caps.as_ref().ok_or(Status::Inval)?;
        let opts = inner.options.as_ref().ok_or(Status::Inval)?;
        Ok(opts.compute_parameters(caps, opts.format()))
    }
}
