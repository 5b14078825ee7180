//! Request entry stage.
//!
//! # Responsibilities
//! - Generate a unique request ID per request (UUID v4)
//! - Resolve the client address from proxy headers or the peer
//! - Attach a `RequestContext` every later stage can read
//! - Stamp `X-Request-ID` and a cache directive on the response
//!
//! # Design Decisions
//! - Request ID added as early as possible so every log line carries it
//! - The context travels in request extensions, typed, never as a string key
//! - `X-Request-ID` is always overwritten; `Cache-Control` is only filled in
//!   when the handler left it unset

use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::header::CACHE_CONTROL;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Response};
use futures_util::future::BoxFuture;
use tower::{Layer, Service};
use uuid::Uuid;

use crate::config::{CacheConfig, ClientIpConfig, GatewayConfig};

/// Response header carrying the request ID.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Unique identifier for a single request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-request values established at pipeline entry.
#[derive(Debug, Clone)]
pub struct RequestContext {
    id: RequestId,
    client_addr: Option<String>,
    started: Instant,
}

impl RequestContext {
    pub fn new<B>(req: &Request<B>, policy: &ClientAddrPolicy) -> Self {
        Self {
            id: RequestId::new(),
            client_addr: policy.resolve(req),
            started: Instant::now(),
        }
    }

    /// The context attached by the entry stage, if any.
    pub fn of<B>(req: &Request<B>) -> Option<&RequestContext> {
        req.extensions().get::<RequestContext>()
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn client_addr(&self) -> Option<&str> {
        self.client_addr.as_deref()
    }

    pub fn started(&self) -> Instant {
        self.started
    }
}

/// Where the client address is read from, in priority order.
#[derive(Debug, Clone)]
pub struct ClientAddrPolicy {
    trusted: HeaderName,
    forwarded: HeaderName,
}

impl ClientAddrPolicy {
    pub fn from_config(config: &ClientIpConfig) -> Self {
        let defaults = Self::default();
        Self {
            trusted: HeaderName::from_bytes(config.trusted_header.as_bytes())
                .unwrap_or(defaults.trusted),
            forwarded: HeaderName::from_bytes(config.forwarded_header.as_bytes())
                .unwrap_or(defaults.forwarded),
        }
    }

    /// Trusted header, then the first forwarding entry, then the peer host.
    pub fn resolve<B>(&self, req: &Request<B>) -> Option<String> {
        let headers = req.headers();

        if let Some(addr) = header_str(headers, &self.trusted).map(str::trim).filter(|v| !v.is_empty()) {
            return Some(addr.to_string());
        }

        if let Some(first) = header_str(headers, &self.forwarded)
            .and_then(|chain| chain.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return Some(first.to_string());
        }

        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(peer)| peer.ip().to_string())
    }
}

impl Default for ClientAddrPolicy {
    fn default() -> Self {
        Self {
            trusted: HeaderName::from_static("x-real-ip"),
            forwarded: HeaderName::from_static("x-forwarded-for"),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Cache directive chosen from the request path.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    api_prefix: String,
    static_directive: HeaderValue,
}

impl CachePolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        let directive = format!("public, max-age={}", config.static_max_age_secs);
        Self {
            api_prefix: config.api_prefix.clone(),
            static_directive: HeaderValue::from_str(&directive)
                .unwrap_or_else(|_| HeaderValue::from_static("no-store")),
        }
    }

    pub fn directive_for(&self, path: &str) -> HeaderValue {
        if path.starts_with(&self.api_prefix) {
            HeaderValue::from_static("no-store")
        } else {
            self.static_directive.clone()
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

/// Layer that runs the entry stage in front of a handler.
#[derive(Debug, Clone, Default)]
pub struct RequestEntryLayer {
    client_addr: Arc<ClientAddrPolicy>,
    cache: Arc<CachePolicy>,
}

impl RequestEntryLayer {
    pub fn new(client_addr: ClientAddrPolicy, cache: CachePolicy) -> Self {
        Self {
            client_addr: Arc::new(client_addr),
            cache: Arc::new(cache),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(
            ClientAddrPolicy::from_config(&config.client_ip),
            CachePolicy::from_config(&config.cache),
        )
    }
}

impl<S> Layer<S> for RequestEntryLayer {
    type Service = RequestEntry<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestEntry {
            inner,
            client_addr: self.client_addr.clone(),
            cache: self.cache.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestEntry<S> {
    inner: S,
    client_addr: Arc<ClientAddrPolicy>,
    cache: Arc<CachePolicy>,
}

impl<S> Service<Request<Body>> for RequestEntry<S>
where
    S: Service<Request<Body>, Response = Response<Body>, Error = Infallible>,
    S::Future: Send + 'static,
{
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response<Body>, Infallible>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let context = RequestContext::new(&req, &self.client_addr);
        let id = HeaderValue::from_str(context.id().as_str()).ok();
        let cache_directive = self.cache.directive_for(req.uri().path());

        req.extensions_mut().insert(context);
        let fut = self.inner.call(req);

        Box::pin(async move {
            let mut response = match fut.await {
                Ok(response) => response,
                Err(never) => match never {},
            };

            let headers = response.headers_mut();
            if let Some(id) = id {
                headers.insert(X_REQUEST_ID, id);
            }
            headers.entry(CACHE_CONTROL).or_insert(cache_directive);

            Ok(response)
        })
    }
}
