//! Connection takeover for protocol upgrades.
//!
//! The transport exposes takeover as hyper's `OnUpgrade` request extension.
//! Decorators never remove it, so a handler behind any number of layers can
//! still claim the raw connection after answering `101 Switching Protocols`.

use axum::http::Request;
use hyper::upgrade::OnUpgrade;
use thiserror::Error;

/// A transport capability was requested but is not available.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("{0} is not supported by this transport")]
    Unsupported(&'static str),
}

/// Whether the transport offered connection takeover for this request.
pub fn can_hijack<B>(req: &Request<B>) -> bool {
    req.extensions().get::<OnUpgrade>().is_some()
}

/// Claim the connection behind `req`.
///
/// The returned future resolves to the raw IO once the `101` response has
/// been written.
pub fn hijack<B>(req: &mut Request<B>) -> Result<OnUpgrade, TransportError> {
    req.extensions_mut()
        .remove::<OnUpgrade>()
        .ok_or(TransportError::Unsupported("connection hijack"))
}
