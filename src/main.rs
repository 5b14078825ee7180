//! taskgate: HTTP transport for the task service.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net::listener ──▶ net::connection ──▶ request pipeline ──▶ app
//!                                                        │
//!                     entry → hardening → gzip → metering → cors → recover
//!
//!     Shutdown: signal ──▶ lifecycle::Shutdown ──▶ http::server (drain ≤ grace period)
//! ```

use std::path::PathBuf;

use clap::Parser;

use taskgate::config::{load_config, validation::validate_config, ConfigError, GatewayConfig};
use taskgate::lifecycle::startup;
use taskgate::{app, observability};

#[derive(Parser)]
#[command(name = "taskgate")]
#[command(about = "HTTP transport and request lifecycle for the task service", long_about = None)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long, env = "TASKGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(long, env = "TASKGATE_BIND")]
    bind: Option<String>,
}

fn load(args: &Args) -> Result<GatewayConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(bind) = &args.bind {
        config.listener.bind_address = bind.clone();
        validate_config(&config).map_err(ConfigError::Validation)?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load(&args)?;

    observability::logging::init(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        "taskgate starting"
    );

    startup::run(&config, app::handler()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
