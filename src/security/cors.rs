//! Allowed-origin handling.
//!
//! A single configured origin may make credentialed cross-origin calls.
//! Requests from any other origin get no CORS headers at all. Wildcards
//! are dropped from the method and header lists since they cannot be
//! combined with credentials.

use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::CorsConfig;

/// Build the CORS layer, or `None` when no origin is configured.
pub fn cors_layer(config: &CorsConfig) -> Option<CorsLayer> {
    let origin = config.allowed_origin.as_deref()?;
    let origin = match HeaderValue::from_str(origin) {
        Ok(origin) => origin,
        Err(_) => {
            tracing::warn!(origin, "Ignoring invalid allowed origin");
            return None;
        }
    };

    let methods: Vec<Method> = config
        .allow_methods
        .iter()
        .filter(|m| m.as_str() != "*")
        .filter_map(|m| m.parse().ok())
        .collect();
    let headers: Vec<HeaderName> = config
        .allow_headers
        .iter()
        .filter(|h| h.as_str() != "*")
        .filter_map(|h| HeaderName::from_bytes(h.as_bytes()).ok())
        .collect();

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::exact(origin))
            .allow_credentials(true)
            .allow_methods(methods)
            .allow_headers(headers),
    )
}
