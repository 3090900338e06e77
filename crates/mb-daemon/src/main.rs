//! Modbus Station daemon entry point.
//!
//! Builds the data store from configuration, installs it as the ambient
//! default store, and runs the TCP slave until a shutdown signal arrives.

mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use mb_common::StationConfig;
use mb_data::{ambient, shared, DataStore};
use mb_server::ModbusTcpServer;

/// Daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "mb-daemon",
    about = "Modbus Station daemon - Modbus TCP slave endpoint",
    version,
    long_about = None
)]
struct Args {
    /// Path to a station configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Interface to bind (overrides config file).
    #[arg(long)]
    host: Option<String>,

    /// TCP port to bind (overrides config file).
    #[arg(long, short = 'p')]
    port: Option<u16>,

    /// Number of coils (overrides config file).
    #[arg(long, value_name = "COUNT")]
    coils: Option<u16>,

    /// Number of discrete inputs (overrides config file).
    #[arg(long, value_name = "COUNT")]
    discrete_inputs: Option<u16>,

    /// Number of holding registers (overrides config file).
    #[arg(long, value_name = "COUNT")]
    holding_registers: Option<u16>,

    /// Number of input registers (overrides config file).
    #[arg(long, value_name = "COUNT")]
    input_registers: Option<u16>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Modbus Station daemon");

    let mut config = load_config(&args)?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(count) = args.coils {
        config.data.coils.count = count;
    }
    if let Some(count) = args.discrete_inputs {
        config.data.discrete_inputs.count = count;
    }
    if let Some(count) = args.holding_registers {
        config.data.holding_registers.count = count;
    }
    if let Some(count) = args.input_registers {
        config.data.input_registers.count = count;
    }
    info!(
        host = %config.server.host,
        port = config.server.port,
        "Configuration loaded"
    );

    let store = shared(DataStore::from_config(&config.data));
    ambient::set_default_store(Arc::clone(&store))
        .context("Failed to install the default data store")?;

    let mut server = ModbusTcpServer::bind(&config.server, store)
        .with_context(|| format!("Failed to bind {}:{}", config.server.host, config.server.port))?;

    signals::install(server.stop_flag()).context("Failed to set up signal handlers")?;

    server.run().context("Server loop failed")?;
    info!("Modbus Station daemon stopped");
    Ok(())
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!(
        "mb_daemon={level},mb_server={level},mb_client={level},mb_proto={level},mb_data={level},mb_common={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .init();
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<StationConfig> {
    if let Some(config_path) = &args.config {
        StationConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"))
    } else {
        let default_path = PathBuf::from("config/default.toml");
        if default_path.exists() {
            info!(?default_path, "Using default configuration file");
            StationConfig::from_file(&default_path)
                .with_context(|| format!("Failed to load default config from {default_path:?}"))
        } else {
            info!("No config file found, using built-in defaults");
            Ok(StationConfig::default())
        }
    }
}
