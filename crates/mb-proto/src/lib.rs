//! Modbus TCP wire protocol.
//!
//! This crate provides:
//! - [`codec`] module with exact-width big-endian primitives and bit packing
//! - [`frame`] module with the MBAP header and the MBAP+PDU frame
//! - [`deframer`] module recovering complete frames from a chunked stream
//!
//! Byte order appears nowhere else in the workspace: everything on the wire
//! is big-endian, everything in memory is host-native.

pub mod codec;
pub mod deframer;
pub mod frame;

pub use deframer::Deframer;
pub use frame::{Frame, MbapHeader};
