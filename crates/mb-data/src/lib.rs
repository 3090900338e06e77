//! Modbus data model.
//!
//! This crate provides:
//! - [`Cell`] - one addressable value with optional read/write hooks
//! - [`DataBank`] - a contiguous, base-addressed array of cells
//! - [`DataStore`] - the four Modbus banks and every data-plane operation
//! - [`ambient`] module with the process-wide default store
//!
//! The store is the single mutable state of the Modbus address space;
//! share it between the server loop and application threads as a
//! [`SharedDataStore`].

pub mod ambient;
pub mod bank;
pub mod cell;
pub mod store;

pub use bank::{BankKind, DataBank};
pub use cell::Cell;
pub use store::{shared, DataStore, SharedDataStore};
