//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (accept loop, lifecycle, drain)
//!     → request.rs (request ID, client address, cache directive)
//!     → pipeline.rs (decorators, outermost first)
//!     → middleware/ (compression, metering, panic containment)
//!     → application handler
//! ```

pub mod body;
pub mod middleware;
pub mod pipeline;
pub mod request;
pub mod server;
pub mod upgrade;

pub use pipeline::{boxed, compose, decorator_fn, Decorator, Handler, Pipeline};
pub use request::{RequestContext, RequestEntryLayer, RequestId, X_REQUEST_ID};
pub use server::{serve, CloseHandle, HttpServer, ServeError};
pub use upgrade::{hijack, TransportError};
