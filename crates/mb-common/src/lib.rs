#![doc = "Common types shared across the Modbus Station workspace."]

pub mod codes;
pub mod config;
pub mod error;

pub use codes::*;
pub use config::*;
pub use error::*;
