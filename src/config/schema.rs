//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Graceful shutdown settings.
    pub shutdown: ShutdownConfig,

    /// Response compression settings.
    pub compression: CompressionConfig,

    /// Allowed-origin (CORS) settings.
    pub cors: CorsConfig,

    /// Hardening headers.
    pub security: SecurityConfig,

    /// Client address resolution.
    pub client_ip: ClientIpConfig,

    /// Cache directive policy.
    pub cache: CacheConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:11000").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:11000".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long in-flight requests may run once shutdown starts, in seconds.
    pub grace_period_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_period_secs: 15 }
    }
}

/// Named compression presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionPreset {
    Fast,
    Standard,
    Best,
}

/// Compression quality, either a preset name or an explicit gzip level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CompressionLevel {
    Preset(CompressionPreset),
    Level(u32),
}

impl CompressionLevel {
    /// Numeric gzip level. Out of range values are passed through untouched.
    pub fn as_u32(&self) -> u32 {
        match self {
            CompressionLevel::Preset(CompressionPreset::Fast) => 1,
            CompressionLevel::Preset(CompressionPreset::Standard) => 6,
            CompressionLevel::Preset(CompressionPreset::Best) => 9,
            CompressionLevel::Level(level) => *level,
        }
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        CompressionLevel::Preset(CompressionPreset::Standard)
    }
}

/// Response compression configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Enable gzip response compression.
    pub enabled: bool,

    /// Compression quality.
    pub level: CompressionLevel,

    /// Content-type prefixes that are never compressed.
    pub excluded_content_types: Vec<String>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: CompressionLevel::default(),
            excluded_content_types: default_excluded_content_types(),
        }
    }
}

/// Media that is already compressed or does not shrink under gzip.
///
/// `application/json` is intentionally absent: API responses are compressed.
pub fn default_excluded_content_types() -> Vec<String> {
    [
        "image/",
        "video/",
        "audio/",
        "application/zip",
        "application/x-gzip",
        "application/gzip",
        "application/x-compressed",
        "application/x-rar-compressed",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Allowed-origin configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// The single origin allowed to make credentialed cross-origin calls.
    /// CORS headers are never emitted when unset.
    pub allowed_origin: Option<String>,

    /// Methods advertised to the allowed origin.
    pub allow_methods: Vec<String>,

    /// Request headers advertised to the allowed origin.
    pub allow_headers: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origin: None,
            allow_methods: ["GET", "POST", "PATCH", "DELETE", "OPTIONS"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allow_headers: ["content-type", "authorization", "x-request-id"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Enable hardening response headers.
    pub enable_headers: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self { enable_headers: true }
    }
}

/// Client address resolution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientIpConfig {
    /// Header set by a trusted proxy carrying a single client address.
    pub trusted_header: String,

    /// Comma separated forwarding chain; the first entry is the client.
    pub forwarded_header: String,
}

impl Default for ClientIpConfig {
    fn default() -> Self {
        Self {
            trusted_header: "x-real-ip".to_string(),
            forwarded_header: "x-forwarded-for".to_string(),
        }
    }
}

/// Cache directive configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Paths under this prefix are API calls and get `no-store`.
    pub api_prefix: String,

    /// `max-age` for everything else.
    pub static_max_age_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            api_prefix: "/api/".to_string(),
            static_max_age_secs: 31_536_000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub log_level: String,

    /// Log line format.
    pub log_format: LogFormat,

    /// Expose Prometheus metrics.
    pub metrics_enabled: bool,

    /// Address of the Prometheus scrape endpoint.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:11000");
        assert_eq!(config.shutdown.grace_period_secs, 15);
        assert_eq!(config.compression.level.as_u32(), 6);
        assert!(config.cors.allowed_origin.is_none());
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }

    #[test]
    fn compression_level_accepts_preset_or_number() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [compression]
            level = "best"
            "#,
        )
        .unwrap();
        assert_eq!(config.compression.level, CompressionLevel::Preset(CompressionPreset::Best));

        let config: GatewayConfig = toml::from_str(
            r#"
            [compression]
            level = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.compression.level.as_u32(), 3);
    }

    #[test]
    fn json_is_not_excluded_from_compression() {
        let excluded = default_excluded_content_types();
        assert!(!excluded.iter().any(|p| "application/json".starts_with(p.as_str())));
        assert!(excluded.iter().any(|p| "image/png".starts_with(p.as_str())));
    }
}
