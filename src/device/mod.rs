//! The central `Device` entity and its registry, state machine, streaming
//! reader, and endpoint prober.
//!
//! One long-lived handle, shared between the event-loop thread (which owns
//! every state transition) and frontend callers (which block on the same
//! lock/condvar to observe them).

pub mod prober;
pub mod reader;
pub mod registry;
pub mod stm;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};

use bitfield::bitfield;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::eloop::{Event, EventLoop, Timer};
use crate::error::Status;
use crate::http::Activity;
use crate::image::ImageDecoder;
use crate::options::ScanOptions;
use crate::pollable::Pollable;
use crate::protocol::{Adapter, Capabilities, Endpoint};

bitfield! {
    /// Frontend-visible lifecycle flags. Orthogonal to the state-machine
    /// state, which tracks the internal op sequence of one job.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Flags(u8);
    impl Debug;
    pub listed, set_listed: 0;
    pub ready, set_ready: 1;
    pub halted, set_halted: 2;
    pub init_wait, set_init_wait: 3;
    pub scanning, set_scanning: 4;
    pub reading, set_reading: 5;
}

impl Default for Flags {
    fn default() -> Self {
        Flags(0)
    }
}

/// The job state machine's states.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum StmState {
    Closed = 0,
    Idle = 1,
    Scanning = 2,
    CancelReq = 3,
    CancelWait = 4,
    Cancelling = 5,
    Cleanup = 6,
    Done = 7,
}

impl StmState {
    /// A state is "working" iff it is strictly between IDLE and DONE.
    pub fn is_working(self) -> bool {
        !matches!(self, StmState::Idle | StmState::Done)
    }
}

/// One decoded image still being drained by the reader.
pub(crate) struct ReaderState {
    pub promised_bytes_per_line: usize,
    pub promised_lines: usize,
    pub decoder_bytes_per_pixel: usize,
    pub line_buf: Vec<u8>,
    pub line_off: usize,
    pub line_num: usize,
    pub read_skip_lines: usize,
    pub read_skip_bytes: usize,
    pub line_end: usize,
}

/// State mutated only on the event-loop thread (held under `Device::lock`,
/// which stands in for "the event-loop lock" in this single-process core).
pub(crate) struct Inner {
    pub flags: Flags,
    pub caps: Option<Capabilities>,
    pub adapter: Option<Adapter>,
    pub base_uri: Option<String>,
    pub job_location: Option<String>,
    pub failed_attempt: u32,
    pub activity: Option<Activity>,
    pub endpoints: Vec<Endpoint>,
    pub endpoint_cursor: usize,
    pub options: Option<ScanOptions>,

    pub job_status: Status,
    pub job_images_received: u64,
    pub skip_x: i64,
    pub skip_y: i64,

    pub nonblocking: bool,
    pub decoder: Option<Box<dyn ImageDecoder>>,
    pub image_queue: VecDeque<Vec<u8>>,
    pub reader: Option<ReaderState>,

    pub cancel_event: Option<Event>,
    pub delay_timer: Option<Timer>,
}

impl Inner {
    fn new() -> Self {
        Inner {
            flags: Flags::default(),
            caps: None,
            adapter: None,
            base_uri: None,
            job_location: None,
            failed_attempt: 0,
            activity: None,
            endpoints: Vec::new(),
            endpoint_cursor: 0,
            options: None,
            job_status: Status::Good,
            job_images_received: 0,
            skip_x: 0,
            skip_y: 0,
            nonblocking: false,
            decoder: None,
            image_queue: VecDeque::new(),
            reader: None,
            cancel_event: None,
            delay_timer: None,
        }
    }
}

/// The central entity: identity is its name; lifecycle is independent of
/// registry membership via `refcount`.
pub struct Device {
    pub name: String,
    pub(crate) eloop: Arc<EventLoop>,
    pub(crate) pollable: Arc<Pollable>,
    /// Back-reference used only by the prober to evict a device whose
    /// endpoint list is exhausted. Empty in tests that build a `Device`
    /// without a registry.
    pub(crate) registry: Weak<registry::Registry>,
    refcount: AtomicU32,
    state: AtomicU8,
    pub(crate) cond: Condvar,
    pub(crate) lock: Mutex<Inner>,
}

impl Device {
    pub(crate) fn new(name: impl Into<String>, eloop: Arc<EventLoop>) -> anyhow::Result<Arc<Device>> {
        Device::with_registry(name, eloop, Weak::new())
    }

    pub(crate) fn with_registry(
        name: impl Into<String>,
        eloop: Arc<EventLoop>,
        registry: Weak<registry::Registry>,
    ) -> anyhow::Result<Arc<Device>> {
        let pollable = Pollable::new().map_err(|e| anyhow::anyhow!("failed to create pollable: {e}"))?;
        let mut inner = Inner::new();
        inner.flags.set_listed(true);
        inner.flags.set_init_wait(true);
        Ok(Arc::new(Device {
            name: name.into(),
            eloop,
            pollable: Arc::new(pollable),
            registry,
            refcount: AtomicU32::new(1),
            state: AtomicU8::new(StmState::Closed as u8),
            cond: Condvar::new(),
            lock: Mutex::new(inner),
        }))
    }

    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::SeqCst)
    }

    pub(crate) fn incref(&self) {
        self.refcount.fetch_add(1, Ordering::SeqCst);
    }

    /// Drop one reference. Returns true if this was the last one.
    pub(crate) fn decref(&self) -> bool {
        self.refcount.fetch_sub(1, Ordering::SeqCst) == 1
    }

    pub fn state(&self) -> StmState {
        StmState::try_from(self.state.load(Ordering::SeqCst)).expect("invalid stm state byte")
    }

    /// Store a new state and broadcast `cond`. Caller must hold `lock`.
    pub(crate) fn set_state_locked(&self, _guard: &mut Inner, new: StmState) {
        self.state.store(new as u8, Ordering::SeqCst);
        if !new.is_working() {
            self.pollable.signal();
        }
        self.cond.notify_all();
    }

    /// Atomically transition `from` to `to`. Returns true on success.
    pub(crate) fn cas_state(&self, from: StmState, to: StmState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn flags(&self) -> Flags {
        self.lock.lock().unwrap().flags
    }
}
