//! msgframe server binary.
//!
//! Features:
//! - Length-prefixed binary frames dispatched by message type
//! - Single-threaded mio reactor or task-per-connection runtime
//! - Configuration via CLI arguments or TOML file

use msgframe::config::Config;
use msgframe::runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        runtime = ?config.runtime,
        max_connections = config.max_connections,
        "Starting msgframe server"
    );

    runtime::run(config)?;
    Ok(())
}
