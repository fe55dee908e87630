//! Endpoint prober: walks a device's advertised endpoints in order,
//! fetching capabilities from each until one answers or the list is
//! exhausted.
//!
//! The job state machine's transport-error handler
//! (`stm::on_transport_error`) is only ever reached through `Activity`
//! instances built here, after a capabilities fetch has already succeeded —
//! probing-phase failures are handled locally by `advance_or_evict`, never
//! routed through the job error path.

use std::sync::Arc;

use crate::http::Activity;
use crate::options::ScanOptions;
use crate::protocol::{ProtoOp, Query, QueryCtx};

use super::{Device, StmState};

/// Kick off (or resume, after a failed attempt) probing for `device`. Always
/// runs on the event-loop thread.
pub fn start(device: Arc<Device>) {
    let eloop = device.eloop.clone();
    eloop.call(move || try_current_endpoint(device));
}

fn try_current_endpoint(device: Arc<Device>) {
    eprintln!("DBG try_current_endpoint");
    let query;
    {
        let mut inner = device.lock.lock().unwrap();
        let Some(endpoint) = inner.endpoints.get(inner.endpoint_cursor).cloned() else {
            drop(inner);
            evict(&device);
            return;
        };

        match inner.adapter.as_mut() {
            Some(adapter) => adapter.switch(endpoint.proto),
            None => inner.adapter = Some(crate::protocol::Adapter::new(endpoint.proto)),
        }
        inner.base_uri = Some(endpoint.uri.clone());

        if inner.activity.is_none() {
            let client = match device.registry.upgrade() {
                Some(registry) => registry.new_http_client(),
                None => Arc::new(crate::http::UreqClient::new()),
            };
            inner.activity = Some(Activity::new(client, device.eloop.clone()));
        }

        let adapter = inner.adapter.as_ref().unwrap();
        let ctx = QueryCtx { base_uri: &endpoint.uri, job_location: None, scan_params: None };
        query = adapter.query(ProtoOp::Capabilities, &ctx);
    }
    submit(device, query);
}

fn submit(device: Arc<Device>, query: Query) {
    let inner = device.lock.lock().unwrap();
    let dev2 = device.clone();
    inner.activity.as_ref().expect("activity installed above").start(query, move |result| on_probe_complete(dev2, result));
}

fn on_probe_complete(device: Arc<Device>, result: Result<crate::protocol::HttpResponse, String>) {
    eprintln!("DBG on_probe_complete");
    let response = match result {
        Ok(r) => r,
        Err(err) => {
            log::warn!("{}: capabilities probe failed: {err}", device.name);
            advance_or_evict(&device);
            return;
        }
    };

    let decoded = {
        let inner = device.lock.lock().unwrap();
        let adapter = inner.adapter.as_ref().expect("adapter installed by try_current_endpoint");
        adapter.decode_capabilities(&response)
    };

    match decoded {
        Ok(caps) => {
            let mut inner = device.lock.lock().unwrap();
            inner.options = Some(ScanOptions::defaults(&caps));
            inner.caps = Some(caps);
            inner.failed_attempt = 0;
            inner.flags.set_ready(true);
            inner.flags.set_init_wait(false);
            device.set_state_locked(&mut inner, StmState::Idle);
            drop(inner);
            if let Some(registry) = device.registry.upgrade() {
                registry.notify_readiness_changed();
            }
        }
        Err(err) => {
            log::warn!("{}: failed to decode capabilities: {err:#}", device.name);
            advance_or_evict(&device);
        }
    }
}

/// Advance to the next endpoint, or remove the device entirely once every
/// endpoint has failed.
fn advance_or_evict(device: &Arc<Device>) {
    let exhausted = {
        let mut inner = device.lock.lock().unwrap();
        inner.endpoint_cursor += 1;
        inner.failed_attempt += 1;
        inner.endpoint_cursor >= inner.endpoints.len()
    };
    if exhausted {
        evict(device);
    } else {
        start(device.clone());
    }
}

fn evict(device: &Arc<Device>) {
    log::error!("{}: exhausted every advertised endpoint, removing device", device.name);
    match device.registry.upgrade() {
        Some(registry) => registry.del(&device.name),
        None => {
            // No registry to evict from (e.g. a device built directly in a
            // test); just mark it halted so callers stop waiting on it.
            let mut inner = device.lock.lock().unwrap();
            inner.flags.set_halted(true);
            inner.flags.set_init_wait(false);
            drop(inner);
        }
    }
}
