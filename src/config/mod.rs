//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → read once while the pipeline and server are built
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; no hot reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    CacheConfig, ClientIpConfig, CompressionConfig, CompressionLevel, CompressionPreset, CorsConfig,
    GatewayConfig, ListenerConfig, LogFormat, ObservabilityConfig, SecurityConfig, ShutdownConfig,
};
pub use validation::ValidationError;
