//! Reference event loop (external collaborator, consumed only).
//!
//! The device subsystem assumes a single-threaded cooperative scheduler: all
//! state-machine transitions happen on "the event-loop thread". This module
//! is a minimal worker-thread implementation of that contract: a single
//! worker thread drained by channels rather than an async runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

type Task = Box<dyn FnOnce() + Send>;

enum Message {
    Run(Task),
    Stop,
}

/// The process-wide event loop. Owns the worker thread that all device
/// state-machine transitions run on.
pub struct EventLoop {
    tx: mpsc::Sender<Message>,
    worker: Option<JoinHandle<()>>,
}

impl EventLoop {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<Message>();
        let worker = thread::Builder::new()
            .name("escl-eloop".into())
            .spawn(move || {
                while let Ok(msg) = rx.recv() {
                    match msg {
                        Message::Run(task) => task(),
                        Message::Stop => break,
                    }
                }
            })
            .expect("failed to spawn event loop thread");
        EventLoop { tx, worker: Some(worker) }
    }

    /// Post a closure to run on the event-loop thread.
    pub fn call(&self, f: impl FnOnce() + Send + 'static) {
        // If the loop has already been shut down, dropping the task is the
        // correct behaviour: there is nobody left to observe its effects.
        let _ = self.tx.send(Message::Run(Box::new(f)));
    }

    /// Create a cross-thread trigger bound to `callback`, which will run on
    /// the event-loop thread each time `trigger()` is called.
    pub fn new_event(&self, callback: impl Fn() + Send + Sync + 'static) -> Event {
        Event { tx: self.tx.clone(), callback: Arc::new(callback) }
    }

    /// Arm a one-shot timer that runs `callback` on the event-loop thread
    /// after `delay`, unless cancelled first.
    pub fn new_timer(&self, delay: Duration, callback: impl FnOnce() + Send + 'static) -> Timer {
        let cancelled = Arc::new(AtomicBool::new(false));
        let tx = self.tx.clone();
        let flag = cancelled.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            if !flag.load(Ordering::SeqCst) {
                let _ = tx.send(Message::Run(Box::new(callback)));
            }
        });
        Timer { cancelled }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Stop);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

#[derive(Clone)]
pub struct Event {
    tx: mpsc::Sender<Message>,
    callback: Arc<dyn Fn() + Send + Sync>,
}

impl Event {
    pub fn trigger(&self) {
        let callback = self.callback.clone();
        let _ = self.tx.send(Message::Run(Box::new(move || callback())));
    }
}

pub struct Timer {
    cancelled: Arc<AtomicBool>,
}

impl Timer {
    /// Cancel the timer. If it has already fired, this is a no-op.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn call_runs_on_worker_thread() {
        let eloop = EventLoop::new();
        let (tx, rx) = channel();
        eloop.call(move || tx.send(42).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 42);
    }

    #[test]
    fn event_trigger_invokes_callback_repeatedly() {
        let eloop = EventLoop::new();
        let (tx, rx) = channel();
        let event = eloop.new_event(move || tx.send(()).unwrap());
        event.trigger();
        event.trigger();
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn cancelled_timer_does_not_fire() {
        let eloop = EventLoop::new();
        let (tx, rx) = channel();
        let timer = eloop.new_timer(Duration::from_millis(20), move || tx.send(()).unwrap());
        timer.cancel();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }
}
