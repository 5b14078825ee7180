//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order (metrics, pipeline, signals)
//! - Bind the listener and begin accepting traffic
//! - Hand the shutdown token to the server
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)

use crate::config::GatewayConfig;
use crate::http::pipeline::{Handler, Pipeline};
use crate::http::server::{HttpServer, ServeError};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::spawn_signal_listener;
use crate::observability::metrics;

/// Serve `app` behind the standard pipeline until a shutdown signal arrives.
pub async fn run(config: &GatewayConfig, app: Handler) -> Result<(), ServeError> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let pipeline = Pipeline::standard(config);
    tracing::info!(decorators = pipeline.len(), "Request pipeline built");
    let handler = pipeline.build(app);

    let shutdown = Shutdown::new();
    spawn_signal_listener(shutdown.clone());

    let server = HttpServer::bind(config).await?;
    tracing::info!(
        address = %server.local_addr(),
        grace_period_secs = config.shutdown.grace_period_secs,
        "Listening for connections"
    );

    server.run(handler, shutdown.token()).await
}
