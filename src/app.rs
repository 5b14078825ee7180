//! Terminal application served behind the pipeline.
//!
//! Only the health probe lives here; the task service plugs in as any
//! other router.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::http::pipeline::{boxed, Handler};

pub fn router() -> Router {
    Router::new()
        .route("/api/health", get(health))
        .fallback(not_found)
}

/// The router boxed as a pipeline terminal.
pub fn handler() -> Handler {
    boxed(router())
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" })))
}
