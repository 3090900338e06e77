//! Modbus TCP slave.
//!
//! This crate provides:
//! - [`service`] module with the per-connection [`DataService`] and the
//!   request dispatcher
//! - [`tcp`] module with the single-threaded [`ModbusTcpServer`] loop
//! - [`metrics`] module with server-wide counters
//!
//! Every request that survives deframing produces exactly one response,
//! normal or exception.

pub mod metrics;
pub mod service;
pub mod tcp;

pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use service::{DataService, Session};
pub use tcp::{ModbusTcpServer, ServerHandle};
