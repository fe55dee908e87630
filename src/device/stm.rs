//! The job state machine: sequences SCAN→LOAD*→STATUS/CLEANUP, handles
//! per-operation delays, and races cancellation against normal completion.
//! The hardest single component in the crate.
//!
//! All transitions here run on the event-loop thread; every state change
//! goes through `Device::set_state_locked`, which broadcasts `stm_cond`.

use std::sync::Arc;

use crate::eloop::Event;
use crate::error::Status;
use crate::protocol::{HttpResponse, NextOp, ProtoOp, ProtoResult};

use super::{Device, Inner, StmState};

/// Kick off a scan: compute geometry, stash the skip residuals the reader
/// will need, move to SCANNING, and submit the SCAN op.
pub fn start_scan(device: &Arc<Device>) {
    eprintln!("DBG start_scan");
    {
        let mut inner = device.lock.lock().unwrap();
        let caps = inner.caps.clone().expect("capabilities required to start a scan");
        let opts = inner.options.clone().expect("scan options required to start a scan");
        let (x, y) = opts.axes(&caps);
        inner.skip_x = x.skip;
        inner.skip_y = y.skip;
        device.set_state_locked(&mut inner, StmState::Scanning);
    }
    submit_op(device.clone(), ProtoOp::Scan);
}

/// Cooperative cancel request from the frontend. Never blocks: either the
/// CAS wins and the cancel event fires, or the job was not SCANNING and
/// this is a no-op.
pub fn cancel_req(device: &Arc<Device>) {
    if device.cas_state(StmState::Scanning, StmState::CancelReq) {
        device.cond.notify_all();
        let inner = device.lock.lock().unwrap();
        if let Some(event) = &inner.cancel_event {
            event.trigger();
        }
    }
}

/// Build the cross-thread cancel event for a device. Installed once, at
/// `open` time.
pub fn make_cancel_event(device: Arc<Device>) -> Event {
    let eloop = device.eloop.clone();
    eloop.new_event(move || cancel_event_callback(device.clone()))
}

/// Handle an HTTP transport failure for an in-flight job operation. Only
/// ever reached after probing succeeds and the job state machine has taken
/// over the device's one `Activity` — probing-phase transport failures are
/// handled locally by the prober and never flow through this path.
///
/// Unlike `job_set_status`, a transport error always marks the job IO_ERROR,
/// even if earlier images were already delivered: whatever page was in
/// flight never arrived, so the attempt to read it must fail.
pub fn on_transport_error(device: &Arc<Device>, err: String) {
    log::warn!("{}: transport error: {err}", device.name);
    let mut inner = device.lock.lock().unwrap();
    if inner.job_status != Status::Cancelled {
        inner.job_status = Status::IoError;
    }
    if !abort_in_flight(device, &mut inner) {
        device.set_state_locked(&mut inner, StmState::Done);
    }
}

/// Ask the state machine to cancel the in-flight job after a reader-side
/// decode error. The reader has already recorded the error status; this
/// only drives the cancel path, it must not relabel the job CANCELLED.
pub fn request_cancel_on_reader_error(device: &Arc<Device>) {
    let mut inner = device.lock.lock().unwrap();
    if !abort_in_flight(device, &mut inner) {
        device.set_state_locked(&mut inner, StmState::Done);
    }
}

fn cancel_event_callback(device: Arc<Device>) {
    let mut inner = device.lock.lock().unwrap();
    if !cancel_perform(&device, &mut inner) {
        device.set_state_locked(&mut inner, StmState::CancelWait);
    }
}

/// Attempt to cancel the in-flight job on a genuine cancellation request:
/// the mechanical abort below, plus marking the job CANCELLED. Returns
/// false if there is nothing yet to cancel (no job_location).
fn cancel_perform(device: &Arc<Device>, inner: &mut Inner) -> bool {
    if !abort_in_flight(device, inner) {
        return false;
    }
    job_set_status(inner, Status::Cancelled);
    true
}

/// Mechanical half shared by the user-cancel and error paths: stop
/// whatever HTTP activity is outstanding and submit CANCEL if the scanner
/// already gave us a job location. Never touches `job_status` — callers
/// that need CANCELLED call `cancel_perform`; callers that already carry
/// an error status (transport/reader) call this directly so it survives.
fn abort_in_flight(device: &Arc<Device>, inner: &mut Inner) -> bool {
    if inner.job_location.is_none() {
        return false;
    }
    if let Some(activity) = &inner.activity {
        activity.cancel();
    }
    device.set_state_locked(inner, StmState::Cancelling);
    submit_op_locked(device, inner, ProtoOp::Cancel);
    true
}

fn submit_op(device: Arc<Device>, op: ProtoOp) {
    let inner = device.lock.lock().unwrap();
    submit_op_locked(&device, &inner, op);
}

fn submit_op_locked(device: &Arc<Device>, inner: &Inner, op: ProtoOp) {
    let query = build_query(inner, op);
    let dev2 = device.clone();
    inner
        .activity
        .as_ref()
        .expect("activity must be installed before the state machine submits queries")
        .start(query, move |result| on_op_complete(dev2, op, result));
}

fn build_query(inner: &Inner, op: ProtoOp) -> crate::protocol::Query {
    let adapter = inner.adapter.as_ref().expect("protocol adapter must be installed before probing completes");
    let scan_params = if op == ProtoOp::Scan {
        let caps = inner.caps.as_ref().expect("capabilities required to build a SCAN query");
        let opts = inner.options.as_ref().expect("scan options required to build a SCAN query");
        Some(opts.to_scan_params(caps))
    } else {
        None
    };
    let ctx = crate::protocol::QueryCtx {
        base_uri: inner.base_uri.as_deref().expect("base uri set by the prober"),
        job_location: inner.job_location.as_deref(),
        scan_params: scan_params.as_ref(),
    };
    adapter.query(op, &ctx)
}

fn on_op_complete(device: Arc<Device>, op: ProtoOp, result: Result<HttpResponse, String>) {
    eprintln!("DBG on_op_complete {:?}", op);
    let response = match result {
        Ok(r) => r,
        Err(err) => {
            on_transport_error(&device, err);
            return;
        }
    };
    let proto_result = {
        let inner = device.lock.lock().unwrap();
        let adapter = inner.adapter.as_ref().expect("protocol adapter must be installed to decode a response");
        adapter.decode(op, &response)
    };
    handle_result(&device, op, proto_result);
}

fn handle_result(device: &Arc<Device>, op: ProtoOp, result: ProtoResult) {
    eprintln!("DBG handle_result {:?} next={:?}", op, result.next);
    let mut inner = device.lock.lock().unwrap();

    match op {
        ProtoOp::Scan => {
            if let Some(location) = result.data.location {
                inner.job_location = Some(location);
                inner.failed_attempt = 0;
                device.cond.notify_all();
            }
        }
        ProtoOp::Load => {
            if let Some(image) = result.data.image {
                inner.image_queue.push_back(image);
                inner.job_images_received += 1;
                device.pollable.signal();
                inner.failed_attempt = 0;
                device.cond.notify_all();
            }
        }
        _ => {}
    }

    job_set_status(&mut inner, result.status);

    // A completion that lands on FINISH wins outright, even over a pending
    // cancel: the job is already over, so there's nothing left to cancel.
    if result.next == NextOp::Finish {
        if inner.job_images_received == 0 && inner.job_status == Status::Good {
            inner.job_status = Status::IoError;
        }
        device.set_state_locked(&mut inner, StmState::Done);
        return;
    }

    // Otherwise, a cancel parked while the job location was still unknown
    // gets to run now: if there's still nowhere to send CANCEL, the job
    // just ends as cancelled rather than inheriting this op's own status.
    if device.state() == StmState::CancelWait {
        if !cancel_perform(device, &mut inner) {
            job_set_status(&mut inner, Status::Cancelled);
            device.set_state_locked(&mut inner, StmState::Done);
        }
        return;
    }

    match result.next {
        NextOp::Cancel => device.set_state_locked(&mut inner, StmState::Cancelling),
        NextOp::Cleanup => device.set_state_locked(&mut inner, StmState::Cleanup),
        _ => {}
    }

    let next_op = to_proto_op(result.next);

    if !result.delay.is_zero() {
        let dev2 = device.clone();
        let timer = device.eloop.new_timer(result.delay, move || submit_op(dev2, next_op));
        inner.delay_timer = Some(timer);
        return;
    }

    drop(inner);
    submit_op(device.clone(), next_op);
}

/// Apply a job status update from a decoded protocol result: CANCELLED
/// always wins and purges the queue; any other error is first-error-wins
/// and only while nothing has been delivered yet.
fn job_set_status(inner: &mut Inner, new: Status) {
    match new {
        Status::Good => {}
        Status::Cancelled => {
            if inner.job_status != Status::Cancelled {
                inner.job_status = Status::Cancelled;
                inner.image_queue.clear();
            }
        }
        other => {
            if inner.job_images_received == 0 && inner.job_status == Status::Good {
                inner.job_status = other;
            }
        }
    }
}

fn to_proto_op(next: NextOp) -> ProtoOp {
    match next {
        NextOp::Load => ProtoOp::Load,
        NextOp::Status => ProtoOp::Status,
        NextOp::Cancel => ProtoOp::Cancel,
        NextOp::Cleanup => ProtoOp::Cleanup,
        NextOp::Finish => unreachable!("FINISH is handled before reaching to_proto_op"),
    }
}
