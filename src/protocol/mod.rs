//! Protocol adapter: type-erased dispatch of capability/scan/load/status/
//! cancel/cleanup requests through a pluggable protocol handler bound to a
//! base URI.
//!
//! Each handler implementation owns one wire format (see `escl.rs`); the
//! adapter picks a handler by `ProtoId` from a static factory table and
//! forwards every operation to it except CANCEL/CLEANUP, which are always
//! answered by the shared dummy result regardless of handler.

pub mod dummy;
pub mod escl;

use std::collections::HashMap;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::error::Status;

/// Identifies which wire-format handler an endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtoId {
    Escl,
}

/// A (protocol, URI) pair advertised by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub proto: ProtoId,
    pub uri: String,
}

impl Endpoint {
    pub fn new(proto: ProtoId, uri: impl Into<String>) -> Self {
        // eSCL base URIs are meaningfully different with/without a trailing
        // slash when concatenated with relative paths; normalise away the
        // distinction here, once, rather than at every call site.
        let mut uri = uri.into();
        while uri.ends_with('/') {
            uri.pop();
        }
        Endpoint { proto, uri }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

/// An HTTP request a protocol handler wants issued.
#[derive(Debug, Clone)]
pub struct Query {
    pub method: HttpMethod,
    pub uri: String,
    pub body: Option<Vec<u8>>,
    pub content_type: Option<String>,
}

/// A completed HTTP response, handed back to the handler for decoding.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    /// The `Location` response header, as returned by a successful
    /// job-creation POST.
    pub location: Option<String>,
}

/// The operations a job can be in the middle of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtoOp {
    Capabilities,
    Scan,
    Load,
    Status,
    Cancel,
    Cleanup,
}

/// What the state machine should do after the current operation completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextOp {
    Finish,
    Load,
    Status,
    Cancel,
    Cleanup,
}

/// Parameters for a SCAN request, computed by the geometry calculator and
/// the frontend's requested source/colour mode.
#[derive(Debug, Clone)]
pub struct ScanParams {
    pub x_off: i64,
    pub y_off: i64,
    pub width: i64,
    pub height: i64,
    pub x_res: u32,
    pub y_res: u32,
    pub source: String,
    pub color_mode: String,
}

/// Side-effect-bearing payload decoded from a response.
#[derive(Debug, Clone, Default)]
pub struct ProtoData {
    pub location: Option<String>,
    pub image: Option<Vec<u8>>,
}

/// The result of decoding one HTTP response.
#[derive(Debug, Clone)]
pub struct ProtoResult {
    pub next: NextOp,
    pub delay: Duration,
    pub status: Status,
    pub data: ProtoData,
    pub error: Option<String>,
}

impl ProtoResult {
    pub fn finish(status: Status) -> Self {
        ProtoResult { next: NextOp::Finish, delay: Duration::ZERO, status, data: ProtoData::default(), error: None }
    }
}

/// Device window limits and native resolution, as reported by capabilities.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub x_limits: crate::geometry::AxisLimits,
    pub y_limits: crate::geometry::AxisLimits,
    pub default_x_res: u32,
    pub default_y_res: u32,
    pub sources: Vec<String>,
    pub color_modes: Vec<String>,
    pub vendor: Option<String>,
    pub model: Option<String>,
}

/// Context a handler needs to build a `Query` for a given operation.
pub struct QueryCtx<'a> {
    pub base_uri: &'a str,
    pub job_location: Option<&'a str>,
    pub scan_params: Option<&'a ScanParams>,
}

/// One pluggable wire-format implementation.
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;

    fn query(&self, op: ProtoOp, ctx: &QueryCtx) -> Query;

    /// Decode a capabilities response. Only called for `ProtoOp::Capabilities`.
    fn decode_capabilities(&self, response: &HttpResponse) -> anyhow::Result<Capabilities>;

    /// Decode a response for SCAN/LOAD/STATUS. CANCEL/CLEANUP never reach a
    /// handler's `decode` — the adapter answers those with the shared dummy
    /// result instead.
    fn decode(&self, op: ProtoOp, response: &HttpResponse) -> ProtoResult;
}

type HandlerFactory = fn() -> Box<dyn Handler>;

static HANDLERS: Lazy<HashMap<ProtoId, HandlerFactory>> = Lazy::new(|| {
    let mut m: HashMap<ProtoId, HandlerFactory> = HashMap::new();
    m.insert(ProtoId::Escl, || Box::new(escl::EsclHandler::new()) as Box<dyn Handler>);
    m
});

/// Instantiate a handler for `id`. Panics for an id missing from the
/// registry table above — per spec, "assert non-null for known protocols".
pub fn new_handler(id: ProtoId) -> Box<dyn Handler> {
    (HANDLERS.get(&id).expect("unknown protocol id"))()
}

/// Type-erased dispatch over the active protocol handler for one endpoint.
pub struct Adapter {
    handler: Box<dyn Handler>,
    proto: ProtoId,
}

impl Adapter {
    pub fn new(proto: ProtoId) -> Self {
        Adapter { handler: new_handler(proto), proto }
    }

    pub fn proto(&self) -> ProtoId {
        self.proto
    }

    /// Free the old handler, install a new one. A no-op if `proto` is
    /// already active.
    pub fn switch(&mut self, proto: ProtoId) {
        if proto != self.proto {
            self.handler = new_handler(proto);
            self.proto = proto;
        }
    }

    pub fn name(&self) -> &'static str {
        self.handler.name()
    }

    pub fn query(&self, op: ProtoOp, ctx: &QueryCtx) -> Query {
        self.handler.query(op, ctx)
    }

    pub fn decode_capabilities(&self, response: &HttpResponse) -> anyhow::Result<Capabilities> {
        self.handler.decode_capabilities(response)
    }

    pub fn decode(&self, op: ProtoOp, response: &HttpResponse) -> ProtoResult {
        match op {
            ProtoOp::Cancel | ProtoOp::Cleanup => dummy::result(),
            _ => self.handler.decode(op, response),
        }
    }
}
