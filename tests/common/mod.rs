//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::routing::get;
use axum::Router;
use serde_json::Value;
use taskgate::config::GatewayConfig;
use taskgate::http::{boxed, CloseHandle, Handler, HttpServer, Pipeline, ServeError};
use taskgate::lifecycle::LifecycleState;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::subscriber::DefaultGuard;

/// Defaults with an ephemeral loopback port.
pub fn local_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config
}

/// A small task-service stand-in.
///
/// - `/api/health`: 200, empty
/// - `/api/tasks`: a JSON list large enough to be worth compressing
/// - `/api/slow`: answers "done" after `delay`
/// - `/api/boom`: panics
pub fn task_app(delay: Duration) -> Handler {
    let router = Router::new()
        .route("/api/health", get(|| async { StatusCode::OK }))
        .route(
            "/api/tasks",
            get(|| async {
                Response::builder()
                    .header("content-type", "application/json")
                    .body(Body::from(task_list_json()))
                    .unwrap()
            }),
        )
        .route(
            "/api/slow",
            get(move || async move {
                tokio::time::sleep(delay).await;
                "done"
            }),
        )
        .route("/api/boom", get(|| async { boom() }));
    boxed(router)
}

fn boom() -> &'static str {
    panic!("task store unavailable")
}

pub fn task_list_json() -> String {
    let tasks: Vec<Value> = (0..200)
        .map(|i| serde_json::json!({ "id": i, "title": format!("task number {i}"), "completed": i % 2 == 0 }))
        .collect();
    serde_json::to_string(&tasks).unwrap()
}

/// The standard pipeline around `task_app`.
pub fn gateway(config: &GatewayConfig, delay: Duration) -> Handler {
    Pipeline::standard(config).build(task_app(delay))
}

pub struct RunningServer {
    pub addr: SocketAddr,
    pub shutdown: CancellationToken,
    pub state: watch::Receiver<LifecycleState>,
    pub close: CloseHandle,
    pub handle: JoinHandle<Result<(), ServeError>>,
}

impl RunningServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }
}

/// Bind and run a server in the background.
pub async fn start_server(config: &GatewayConfig, handler: Handler, grace_period: Duration) -> RunningServer {
    let server = HttpServer::bind(config)
        .await
        .unwrap()
        .with_grace_period(grace_period);
    let addr = server.local_addr();
    let state = server.state();
    let close = server.close_handle();
    let shutdown = CancellationToken::new();

    let handle = tokio::spawn(server.run(handler, shutdown.clone()));
    wait_for_state(state.clone(), LifecycleState::Running).await;

    RunningServer {
        addr,
        shutdown,
        state,
        close,
        handle,
    }
}

pub async fn wait_for_state(mut state: watch::Receiver<LifecycleState>, wanted: LifecycleState) {
    tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| *s == wanted))
        .await
        .expect("state not reached in time")
        .unwrap();
}

pub fn ok_handler() -> Handler {
    boxed(tower::service_fn(|_req: Request<Body>| async {
        Ok::<_, Infallible>(Response::new(Body::from("ok")))
    }))
}

/// In-memory JSON log capture for the current thread.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn with_message(&self, message: &str) -> Vec<Value> {
        let buf = self.0.lock().unwrap();
        String::from_utf8_lossy(&buf)
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter(|record| record["message"] == message)
            .collect()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn capture_logs() -> (DefaultGuard, CapturedLogs) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .flatten_event(true)
        .with_max_level(tracing::Level::INFO)
        .with_writer(move || writer.clone())
        .finish();
    (tracing::subscriber::set_default(subscriber), logs)
}
