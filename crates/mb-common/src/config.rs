//! Configuration structures for the Modbus station.
//!
//! Supports TOML deserialization with sensible defaults for
//! development and explicit values for production deployment.

use crate::error::{MbError, MbResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Top-level station configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// TCP server (slave) configuration.
    pub server: ServerConfig,

    /// Address-space layout of the four data banks.
    pub data: DataMapConfig,

    /// TCP client (master) configuration.
    pub client: ClientConfig,
}

impl StationConfig {
    /// Load a configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> MbResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| MbError::Config(format!("read {}: {e}", path.as_ref().display())))?;
        let config = toml::from_str(&text)
            .map_err(|e| MbError::Config(format!("parse {}: {e}", path.as_ref().display())))?;
        debug!(path = %path.as_ref().display(), "Configuration loaded");
        Ok(config)
    }
}

/// TCP server (slave side) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,

    /// TCP port; 502 is the Modbus default.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 502,
        }
    }
}

/// Size and start address of one data bank.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BankConfig {
    /// Number of addressable cells.
    pub count: u16,

    /// Logical address of the first cell.
    pub start_address: u16,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            count: 256,
            start_address: 0,
        }
    }
}

/// Address-space layout of the four Modbus data banks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataMapConfig {
    /// Coils (1-bit, read/write).
    pub coils: BankConfig,

    /// Discrete inputs (1-bit, read-only over the wire).
    pub discrete_inputs: BankConfig,

    /// Holding registers (16-bit, read/write).
    pub holding_registers: BankConfig,

    /// Input registers (16-bit, read-only over the wire).
    pub input_registers: BankConfig,
}

/// TCP client (master side) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Slave host to connect to.
    pub host: String,

    /// Slave TCP port.
    pub port: u16,

    /// Unit identifier placed in every request.
    pub unit_id: u8,

    /// Connection establishment timeout.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Deadline for a matching response to each request.
    #[serde(with = "humantime_serde")]
    pub response_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 502,
            unit_id: 1,
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(5),
        }
    }
}
