//! Modbus TCP master.
//!
//! [`ModbusTcpClient`] owns one connection and serializes concurrent
//! callers behind a mutex, preserving one-outstanding-transaction
//! semantics on the wire.

pub mod client;

pub use client::ModbusTcpClient;
