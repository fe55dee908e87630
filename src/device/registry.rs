//! Process-wide device registry: a keyed table of devices with reference
//! counting, a readiness barrier, and bulk filtering by flag mask.

use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use indexmap::IndexMap;

use super::{Device, Flags};
use crate::eloop::EventLoop;
use crate::http::{HttpClient, UreqClient};
use crate::image::ImageDecoder;
use crate::protocol::Endpoint;

struct Table {
    devices: IndexMap<String, Arc<Device>>,
    /// True from construction until discovery's initial scan completes;
    /// `list`/`open` block on this clearing in addition to no device
    /// holding INIT_WAIT.
    initial_scan_in_progress: bool,
}

/// Builds one `HttpClient` per device. Each device's `Activity` needs its
/// own client (one in-flight request at a time, per device); swappable to
/// hand every probed device a test double instead of `ureq`.
pub type ClientFactory = Arc<dyn Fn() -> Arc<dyn HttpClient> + Send + Sync>;

/// Builds one `ImageDecoder` per device. Unlike `ClientFactory`, this crate
/// ships no production implementation to default to (real JPEG/PNG
/// decoding is left to the embedder) — an embedder that actually reads
/// images must supply one via `Registry::with_factories`.
pub type DecoderFactory = Arc<dyn Fn() -> Box<dyn ImageDecoder> + Send + Sync>;

fn no_decoder_configured() -> Box<dyn ImageDecoder> {
    panic!(
        "no ImageDecoder configured: build the registry with Registry::with_factories(..) \
         and supply a decoder_factory — this crate does not ship a production image decoder"
    )
}

pub struct Registry {
    self_weak: Weak<Registry>,
    eloop: Arc<EventLoop>,
    client_factory: ClientFactory,
    decoder_factory: DecoderFactory,
    table: Mutex<Table>,
    ready_cond: Condvar,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Registry::with_event_loop(Arc::new(EventLoop::new()))
    }

    pub fn with_event_loop(eloop: Arc<EventLoop>) -> Arc<Self> {
        Registry::with_event_loop_and_client_factory(eloop, Arc::new(|| Arc::new(UreqClient::new()) as Arc<dyn HttpClient>))
    }

    /// Build a registry whose devices get their `HttpClient` from
    /// `client_factory` instead of the default `ureq`-backed one, with no
    /// working decoder (see `no_decoder_configured`). Intended for wiring
    /// in a test double where no image is ever actually read.
    pub fn with_event_loop_and_client_factory(eloop: Arc<EventLoop>, client_factory: ClientFactory) -> Arc<Self> {
        Registry::with_factories(eloop, client_factory, Arc::new(no_decoder_configured))
    }

    /// Build a registry with both collaborator factories under test/embedder
    /// control.
    pub fn with_factories(eloop: Arc<EventLoop>, client_factory: ClientFactory, decoder_factory: DecoderFactory) -> Arc<Self> {
        Arc::new_cyclic(|weak| Registry {
            self_weak: weak.clone(),
            eloop,
            client_factory,
            decoder_factory,
            table: Mutex::new(Table { devices: IndexMap::new(), initial_scan_in_progress: true }),
            ready_cond: Condvar::new(),
        })
    }

    pub(crate) fn new_http_client(&self) -> Arc<dyn HttpClient> {
        (self.client_factory)()
    }

    pub(crate) fn new_decoder(&self) -> Box<dyn ImageDecoder> {
        (self.decoder_factory)()
    }

    /// Reject a duplicate name; otherwise allocate a device with
    /// refcount=1, LISTED and INIT_WAIT set, and kick off probing.
    pub fn add(&self, name: String, endpoints: Vec<Endpoint>) {
        let mut table = self.table.lock().unwrap();
        if table.devices.contains_key(&name) {
            log::warn!("ignoring duplicate device announcement for {name}");
            return;
        }
        let device = match Device::with_registry(name.clone(), self.eloop.clone(), self.self_weak.clone()) {
            Ok(d) => d,
            Err(e) => {
                log::error!("failed to allocate device {name}: {e:#}");
                return;
            }
        };
        {
            let mut inner = device.lock.lock().unwrap();
            inner.endpoints = endpoints;
        }
        table.devices.insert(name.clone(), device.clone());
        drop(table);
        super::prober::start(device);
    }

    /// Remove from the table, cancel HTTP, set HALTED, clear READY, drop
    /// one reference.
    pub fn del(&self, name: &str) {
        let device = {
            let mut table = self.table.lock().unwrap();
            table.devices.shift_remove(name)
        };
        let Some(device) = device else { return };
        {
            let mut inner = device.lock.lock().unwrap();
            if let Some(activity) = &inner.activity {
                activity.cancel();
            }
            inner.flags.set_listed(false);
            inner.flags.set_halted(true);
            inner.flags.set_ready(false);
        }
        if device.decref() {
            log::debug!("device {} dropped its last reference", device.name);
        }
        self.ready_cond.notify_all();
    }

    pub fn find(&self, name: &str) -> Option<Arc<Device>> {
        self.table.lock().unwrap().devices.get(name).cloned()
    }

    /// Devices whose flags intersect `mask`, in table order.
    pub fn collect(&self, mask: Flags) -> Vec<Arc<Device>> {
        self.table
            .lock()
            .unwrap()
            .devices
            .values()
            .filter(|d| (d.flags().0 & mask.0) != 0)
            .cloned()
            .collect()
    }

    pub fn size(&self) -> usize {
        self.table.lock().unwrap().devices.len()
    }

    /// True iff the initial scan has finished and no device holds
    /// INIT_WAIT.
    pub fn is_ready(&self) -> bool {
        let table = self.table.lock().unwrap();
        !table.initial_scan_in_progress && !table.devices.values().any(|d| d.flags().init_wait())
    }

    /// Called once discovery's initial scan has enumerated every device it
    /// will find at startup.
    pub fn mark_ready(&self) {
        self.table.lock().unwrap().initial_scan_in_progress = false;
        self.ready_cond.notify_all();
    }

    /// Recheck readiness (e.g. after a device clears INIT_WAIT) and wake
    /// any blocked `list`/`open` caller.
    pub(crate) fn notify_readiness_changed(&self) {
        self.ready_cond.notify_all();
    }

    /// Block up to `timeout` for `is_ready()`.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let table = self.table.lock().unwrap();
        let (_table, _timed_out) = self
            .ready_cond
            .wait_timeout_while(table, timeout, |t| {
                t.initial_scan_in_progress || t.devices.values().any(|d| d.flags().init_wait())
            })
            .unwrap();
        let _ = deadline;
        self.is_ready()
    }

    /// Delete every device.
    pub fn purge(&self) {
        let names: Vec<String> = self.table.lock().unwrap().devices.keys().cloned().collect();
        for name in names {
            self.del(&name);
        }
    }
}
