//! Connection lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Serve one HTTP connection per task (HTTP/1.1, HTTP/2, upgrades)
//! - Coordinate graceful shutdown per-connection
//!
//! # Design Decisions
//! - Every connection task lives in one `TaskTracker` so the coordinator can
//!   wait for all of them with a deadline
//! - Two signals reach each connection: `drain` (finish in-flight requests,
//!   refuse new ones) and `force` (drop the connection now)

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::Request;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;

use crate::http::pipeline::Handler;
use crate::net::listener::ConnectionPermit;

/// Global atomic counter for connection IDs.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Tracks connection tasks and fans shutdown signals out to them.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    tasks: TaskTracker,
    drain: CancellationToken,
    force: CancellationToken,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task serving `stream` with `handler`.
    pub fn serve(&self, stream: TcpStream, peer: SocketAddr, handler: Handler, permit: ConnectionPermit) {
        let drain = self.drain.clone();
        let force = self.force.clone();
        self.tasks.spawn(async move {
            serve_connection(stream, peer, handler, drain, force).await;
            drop(permit);
        });
    }

    /// Ask every connection to finish in-flight requests and close.
    pub fn begin_drain(&self) {
        self.drain.cancel();
    }

    /// Drop every connection immediately.
    pub fn force_close(&self) {
        self.force.cancel();
    }

    /// No more connections will be spawned.
    pub fn close(&self) {
        self.tasks.close();
    }

    /// Resolves once `close` was called and every connection task ended.
    pub async fn wait(&self) {
        self.tasks.wait().await;
    }

    /// Number of live connection tasks.
    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Handler,
    drain: CancellationToken,
    force: CancellationToken,
) {
    let id = ConnectionId::new();
    tracing::trace!(connection_id = %id, peer_addr = %peer, "Connection opened");

    let service = hyper::service::service_fn(move |req: Request<Incoming>| {
        let mut req = req.map(Body::new);
        req.extensions_mut().insert(ConnectInfo(peer));
        handler.clone().oneshot(req)
    });

    let builder = Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(connection_id = %id, error = %e, "Connection error");
                }
                break;
            }
            _ = drain.cancelled(), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
            _ = force.cancelled() => {
                tracing::debug!(connection_id = %id, "Connection force closed");
                break;
            }
        }
    }

    tracing::trace!(connection_id = %id, "Connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("conn-"));
    }

    #[tokio::test]
    async fn wait_resolves_only_after_close() {
        let tracker = ConnectionTracker::new();
        tracker.tasks.spawn(async {});

        let early = tokio::time::timeout(Duration::from_millis(50), tracker.wait()).await;
        assert!(early.is_err());

        tracker.close();
        tokio::time::timeout(Duration::from_secs(1), tracker.wait()).await.unwrap();
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn force_close_reaches_every_clone() {
        let tracker = ConnectionTracker::new();
        let token = tracker.clone().force;
        assert!(!token.is_cancelled());

        tracker.force_close();
        assert!(token.is_cancelled());
    }
}
