//! HTTP server lifecycle.
//!
//! # Responsibilities
//! - Bind the listener and publish lifecycle state
//! - Run the accept loop in its own task
//! - Race the accept loop against the shutdown token
//! - Drain in-flight connections within the grace period
//!
//! # Data Flow
//! ```text
//! bind ──→ ServeError::Bind (startup failed, nothing to observe)
//! bind ──→ Starting ──→ Running ─┬─ accept loop ends first ──→ Stopped / Failed
//!                                └─ shutdown token fires
//!                                      → Draining
//!                                      → stop accepting, drain connections
//!                                      → wait ≤ grace period
//!                                      → Stopped (or Failed on timeout)
//! ```
//!
//! # Design Decisions
//! - The accept loop reports its outcome exactly once over a oneshot
//! - The race is biased towards that outcome, so a loop that already
//!   ended is never mistaken for a shutdown request
//! - Both the drain and the accept outcome are observed before returning

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::http::pipeline::Handler;
use crate::lifecycle::state::{LifecycleState, StateCell};
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};

/// Why a server stopped with an error.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("server startup failed: {0}")]
    Bind(#[source] ListenerError),
    #[error("server shutdown failed: connections still open after {0:?}")]
    ShutdownTimeout(Duration),
    #[error("listen and serve failed: {0}")]
    Listener(#[source] ListenerError),
}

/// Stops the accept loop and drops every connection without draining.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    stop: CancellationToken,
    connections: ConnectionTracker,
}

impl CloseHandle {
    pub fn close(&self) {
        tracing::info!("Server close requested");
        self.stop.cancel();
        self.connections.force_close();
    }
}

/// A bound HTTP server, ready to run.
pub struct HttpServer {
    listener: Listener,
    grace_period: Duration,
    connections: ConnectionTracker,
    stop: CancellationToken,
    state: StateCell,
}

impl HttpServer {
    /// Bind the configured listener.
    ///
    /// A bind failure is the `Failed` outcome of startup. It is reported only
    /// through `ServeError::Bind`: no server exists yet, so no state channel
    /// is published and `Running` is never entered.
    pub async fn bind(config: &GatewayConfig) -> Result<Self, ServeError> {
        let listener = Listener::bind(&config.listener).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to bind listener");
            ServeError::Bind(e)
        })?;

        Ok(Self {
            listener,
            grace_period: Duration::from_secs(config.shutdown.grace_period_secs),
            connections: ConnectionTracker::new(),
            stop: CancellationToken::new(),
            state: StateCell::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Observe lifecycle transitions.
    pub fn state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            stop: self.stop.clone(),
            connections: self.connections.clone(),
        }
    }

    /// Override the drain deadline.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Serve `handler` until the accept loop ends or `shutdown` is cancelled.
    pub async fn run(self, handler: Handler, shutdown: CancellationToken) -> Result<(), ServeError> {
        let HttpServer {
            listener,
            grace_period,
            connections,
            stop,
            state,
        } = self;
        tracing::info!(address = %listener.local_addr(), "HTTP server accepting connections");

        let parts = ServerParts {
            grace_period,
            connections,
            stop,
        };
        coordinate(listener, handler, shutdown, parts, &state).await
    }
}

/// Where the accept loop takes connections from.
pub(crate) trait Acceptor: Send + Sync + 'static {
    fn accept(
        &self,
    ) -> impl Future<Output = Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError>> + Send;
}

impl Acceptor for Listener {
    fn accept(
        &self,
    ) -> impl Future<Output = Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError>> + Send {
        Listener::accept(self)
    }
}

/// Everything the coordinator needs besides the acceptor.
pub(crate) struct ServerParts {
    pub(crate) grace_period: Duration,
    pub(crate) connections: ConnectionTracker,
    pub(crate) stop: CancellationToken,
}

/// Run the accept loop in its own task and race it against `shutdown`.
pub(crate) async fn coordinate<A: Acceptor>(
    acceptor: A,
    handler: Handler,
    shutdown: CancellationToken,
    parts: ServerParts,
    state: &StateCell,
) -> Result<(), ServeError> {
    let ServerParts {
        grace_period,
        connections,
        stop,
    } = parts;

    let (done_tx, done_rx) = oneshot::channel();
    tokio::spawn({
        let stop = stop.clone();
        let connections = connections.clone();
        async move {
            let outcome = accept_loop(acceptor, handler, stop, connections).await;
            let _ = done_tx.send(outcome);
        }
    });

    state.transition(LifecycleState::Running);
    tracing::info!("HTTP server running");

    let mut done_rx = done_rx;
    let result = tokio::select! {
        biased;

        outcome = &mut done_rx => {
            connections.force_close();
            connections.close();
            accept_outcome(outcome)
        }
        _ = shutdown.cancelled() => {
            tracing::info!("Cancellation detected, shutting down server");
            state.transition(LifecycleState::Draining);
            drain(stop, connections, done_rx, grace_period).await
        }
    };

    match &result {
        Ok(()) => {
            state.transition(LifecycleState::Stopped);
            tracing::info!("HTTP server stopped");
        }
        Err(e) => {
            state.transition(LifecycleState::Failed);
            tracing::error!(error = %e, "HTTP server failed");
        }
    }
    result
}

/// Bind and run in one step.
pub async fn serve(config: &GatewayConfig, handler: Handler, shutdown: CancellationToken) -> Result<(), ServeError> {
    HttpServer::bind(config).await?.run(handler, shutdown).await
}

async fn accept_loop<A: Acceptor>(
    acceptor: A,
    handler: Handler,
    stop: CancellationToken,
    connections: ConnectionTracker,
) -> Result<(), ListenerError> {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            accepted = acceptor.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer, permit)) => connections.serve(stream, peer, handler.clone(), permit),
            Err(e) if e.is_connection_error() => {
                tracing::debug!(error = %e, "Accept failed, continuing");
            }
            Err(e) => return Err(e),
        }
    }

    tracing::info!("Listener closed");
    Ok(())
}

async fn drain(
    stop: CancellationToken,
    connections: ConnectionTracker,
    done_rx: oneshot::Receiver<Result<(), ListenerError>>,
    grace_period: Duration,
) -> Result<(), ServeError> {
    let deadline = Instant::now() + grace_period;
    tracing::info!(timeout = ?grace_period, "Draining connections");

    stop.cancel();
    connections.begin_drain();
    let outcome = done_rx.await;
    connections.close();

    if tokio::time::timeout_at(deadline, connections.wait()).await.is_err() {
        tracing::warn!(
            remaining = connections.active_count(),
            "Grace period exceeded, forcing connections closed"
        );
        connections.force_close();
        connections.wait().await;
        return Err(ServeError::ShutdownTimeout(grace_period));
    }

    accept_outcome(outcome)
}

fn accept_outcome(
    outcome: Result<Result<(), ListenerError>, oneshot::error::RecvError>,
) -> Result<(), ServeError> {
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ServeError::Listener(e)),
        Err(_) => Err(ServeError::Listener(ListenerError::Accept(io::Error::other(
            "accept loop ended without reporting",
        )))),
    }
}
