//! Device subsystem for a network scanner backend: discovers eSCL-style
//! scanner endpoints, negotiates the protocol, runs the per-job state
//! machine with cancellation, pipelines received images through a
//! consumer-paced reader, and exposes a synchronous frontend API.
//!
//! The hard engineering lives in three tightly coupled pieces: the job
//! state machine ([`device::stm`]), the device registry
//! ([`device::registry`]), and the streaming image reader
//! ([`device::reader`]). Everything else — the geometry calculator, the
//! protocol adapter, the HTTP activity wrapper, the endpoint prober, and
//! the frontend facade — exists to drive or expose those three.
//!
//! Zeroconf discovery, the HTTP client, the protocol handler table, the
//! image decoder, and the option/capability model are external
//! collaborators; this crate ships one reference implementation of each
//! (see [`protocol::escl`], [`http::UreqClient`], [`eloop`], [`pollable`])
//! so its own test suite can run standalone.

pub mod config;
pub mod device;
pub mod discovery;
pub mod eloop;
pub mod error;
pub mod facade;
pub mod geometry;
pub mod http;
pub mod image;
pub mod options;
pub mod pollable;
pub mod protocol;

pub use error::Status;
pub use facade::{DeviceHandle, DeviceInfo, DeviceManager};
