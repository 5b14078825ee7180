//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → cors.rs (answer preflights, tag allowed origin)
//!     → headers.rs (hardening headers on the way out)
//!     → Pass to the rest of the pipeline
//! ```
//!
//! # Design Decisions
//! - CORS is off unless an origin is configured
//! - Hardening headers are unconditional once enabled

pub mod cors;
pub mod headers;

pub use cors::cors_layer;
pub use headers::HardeningHeadersLayer;
