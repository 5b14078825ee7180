//! Transport decorators wrapped around the application handler.
//!
//! # Data Flow
//! ```text
//! request  → compression (negotiate) → metering (count in)  → cors → recover → app
//! response ← compression (encode)    ← metering (count out) ← cors ← recover ← app
//!
//! CORS preflights are answered between metering and recover.
//! ```

pub mod compression;
pub mod metering;
pub mod recover;

pub use compression::CompressionLayer;
pub use metering::{format_bytes, MeteringLayer};
pub use recover::RecoverLayer;
