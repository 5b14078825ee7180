//! HTTP transport and request-lifecycle layer for the task service.

pub mod app;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod security;

pub use config::schema::GatewayConfig;
pub use http::{HttpServer, Pipeline};
pub use lifecycle::Shutdown;
