//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (deadline > 0, gzip level 0-9)
//! - Check that addresses and header values parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use axum::http::{HeaderName, HeaderValue};
use thiserror::Error;

use crate::config::schema::GatewayConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address `{0}` is not a socket address")]
    BindAddress(String),
    #[error("listener.max_connections must be greater than zero")]
    MaxConnections,
    #[error("shutdown.grace_period_secs must be greater than zero")]
    GracePeriod,
    #[error("compression.level {0} is outside 0-9")]
    CompressionLevel(u32),
    #[error("cors.allowed_origin `{0}` is not a valid header value")]
    AllowedOrigin(String),
    #[error("client_ip header `{0}` is not a valid header name")]
    ClientIpHeader(String),
    #[error("cache.api_prefix `{0}` must start with `/`")]
    ApiPrefix(String),
    #[error("observability.metrics_address `{0}` is not a socket address")]
    MetricsAddress(String),
}

/// Check every semantic rule and collect all violations.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::MaxConnections);
    }
    if config.shutdown.grace_period_secs == 0 {
        errors.push(ValidationError::GracePeriod);
    }

    let level = config.compression.level.as_u32();
    if level > 9 {
        errors.push(ValidationError::CompressionLevel(level));
    }

    if let Some(origin) = &config.cors.allowed_origin {
        if HeaderValue::from_str(origin).is_err() {
            errors.push(ValidationError::AllowedOrigin(origin.clone()));
        }
    }

    for header in [&config.client_ip.trusted_header, &config.client_ip.forwarded_header] {
        if HeaderName::from_bytes(header.as_bytes()).is_err() {
            errors.push(ValidationError::ClientIpHeader(header.clone()));
        }
    }

    if !config.cache.api_prefix.starts_with('/') {
        errors.push(ValidationError::ApiPrefix(config.cache.api_prefix.clone()));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(config.observability.metrics_address.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
