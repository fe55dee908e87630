//! HTTP transport contract and the `Activity` wrapper around it.
//!
//! One in-flight request at a time, with its result always posted back
//! onto the event-loop thread rather than returned synchronously.
//! `Activity` additionally owns the per-request delay timer and cancels
//! whichever of the two (pending request, pending delay timer) is
//! currently outstanding.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::eloop::{EventLoop, Timer};
use crate::protocol::{HttpMethod, HttpResponse, Query};

/// Transport contract: issue at most one request at a time, deliver the
/// result (or failure) back through a completion callback on the event
/// loop. Implementations own their own worker threads; `submit`/`cancel`
/// must be cheap and non-blocking.
pub trait HttpClient: Send + Sync {
    /// Start `query`. `on_done` is called exactly once, with `Ok(response)`
    /// on success or `Err(message)` on transport failure, unless the
    /// request is cancelled first (in which case it may not be called).
    fn submit(&self, query: Query, on_done: Box<dyn FnOnce(Result<HttpResponse, String>) + Send>);

    /// Cancel any in-flight request. A no-op if nothing is outstanding.
    fn cancel(&self);
}

/// Wraps an `HttpClient` with the retry/delay machinery the job state
/// machine needs: at most one request and at most one delay timer
/// outstanding at a time, both cancellable together.
pub struct Activity {
    client: Arc<dyn HttpClient>,
    eloop: Arc<EventLoop>,
    timer: Mutex<Option<Timer>>,
}

impl Activity {
    pub fn new(client: Arc<dyn HttpClient>, eloop: Arc<EventLoop>) -> Self {
        Activity { client, eloop, timer: Mutex::new(None) }
    }

    /// Issue `query` right away, calling `on_done` on the event-loop thread
    /// once it completes.
    pub fn start(&self, query: Query, on_done: impl FnOnce(Result<HttpResponse, String>) + Send + 'static) {
        eprintln!("DBG Activity::start op");
        let eloop = self.eloop.clone();
        self.client.submit(
            query,
            Box::new(move |result| {
                eprintln!("DBG Activity::start on_done fired, enqueueing");
                eloop.call(move || { eprintln!("DBG Activity::start on_done running"); on_done(result) });
            }),
        );
    }

    /// Issue `query` after `delay`, unless cancelled first.
    pub fn start_after(
        &self,
        query: Query,
        delay: Duration,
        on_done: impl FnOnce(Result<HttpResponse, String>) + Send + 'static,
    ) {
        if delay.is_zero() {
            self.start(query, on_done);
            return;
        }
        let client = self.client.clone();
        let eloop = self.eloop.clone();
        let timer = self.eloop.new_timer(delay, move || {
            client.submit(
                query,
                Box::new(move |result| {
                    eloop.call(move || on_done(result));
                }),
            );
        });
        *self.timer.lock().unwrap() = Some(timer);
    }

    /// Cancel whichever of {pending delay timer, in-flight request} is
    /// outstanding. Safe to call when neither is outstanding.
    pub fn cancel(&self) {
        if let Some(timer) = self.timer.lock().unwrap().take() {
            timer.cancel();
        }
        self.client.cancel();
    }
}

/// Reference `HttpClient` built on `ureq`: a short-lived worker thread per
/// request, synchronous inside the thread. Good enough for tests and for a
/// single scanner's worth of traffic; a production build driving many
/// devices concurrently would want a bounded thread pool instead.
pub struct UreqClient {
    agent: ureq::Agent,
}

impl UreqClient {
    pub fn new() -> Self {
        UreqClient { agent: ureq::AgentBuilder::new().timeout(Duration::from_secs(30)).build() }
    }
}

impl Default for UreqClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for UreqClient {
    fn submit(&self, query: Query, on_done: Box<dyn FnOnce(Result<HttpResponse, String>) + Send>) {
        let agent = self.agent.clone();
        std::thread::spawn(move || {
            let result = run_query(&agent, &query);
            on_done(result);
        });
    }

    /// `ureq` requests are not cancellable mid-flight; the in-flight thread
    /// simply runs to completion and its (now unwanted) result is dropped
    /// by whichever `on_done` closure still holds a live receiver.
    fn cancel(&self) {}
}

fn run_query(agent: &ureq::Agent, query: &Query) -> Result<HttpResponse, String> {
    let method = match query.method {
        HttpMethod::Get => "GET",
        HttpMethod::Post => "POST",
        HttpMethod::Delete => "DELETE",
    };
    let mut req = agent.request(method, &query.uri);
    if let Some(ct) = &query.content_type {
        req = req.set("Content-Type", ct);
    }
    let response = if let Some(body) = &query.body {
        req.send_bytes(body)
    } else {
        req.call()
    };
    match response {
        Ok(resp) => {
            let status = resp.status();
            let content_type = resp.header("Content-Type").map(str::to_string);
            let location = resp.header("Location").map(str::to_string);
            let mut body = Vec::new();
            resp.into_reader().read_to_end(&mut body).map_err(|e| e.to_string())?;
            Ok(HttpResponse { status, body, content_type, location })
        }
        Err(ureq::Error::Status(status, resp)) => {
            let content_type = resp.header("Content-Type").map(str::to_string);
            let location = resp.header("Location").map(str::to_string);
            let mut body = Vec::new();
            let _ = resp.into_reader().read_to_end(&mut body);
            Ok(HttpResponse { status, body, content_type, location })
        }
        Err(ureq::Error::Transport(t)) => Err(t.to_string()),
    }
}
