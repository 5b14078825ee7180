//! Request/response metering and the access log.
//!
//! # Responsibilities
//! - Count request body bytes as the handler reads them
//! - Count response body bytes as they are yielded outward
//! - Emit exactly one access record per request
//!
//! # Design Decisions
//! - The record is a drop guard owned by the response body: it fires when
//!   the body ends or when the body is dropped early, never twice
//! - Status comes from the response head; byte counts come from the frames
//!   that actually crossed this layer
//! - When the handler never read the request body the declared
//!   `Content-Length` is reported instead

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::header::{CONTENT_LENGTH, ORIGIN};
use axum::http::{Method, Request, Response, StatusCode};
use bytes::Buf;
use futures_util::future::BoxFuture;
use http_body::{Body as HttpBody, Frame, SizeHint};
use pin_project_lite::pin_project;
use tower::{Layer, Service};

use crate::http::body::{ByteCounter, CountingBody};
use crate::http::request::{ClientAddrPolicy, RequestContext, RequestId};
use crate::observability::metrics;

const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];

/// Human readable byte count with binary steps.
///
/// Below 1024 the raw count is printed; larger values get two decimals and
/// stay in PB once past it.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes}B");
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2}{}", UNITS[unit])
}

/// Layer that meters every request passing through it.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeteringLayer;

impl MeteringLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for MeteringLayer {
    type Service = Metering<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Metering { inner }
    }
}

#[derive(Debug, Clone)]
pub struct Metering<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for Metering<S>
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

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let received = ByteCounter::new();
        let pending = PendingRecord::from_request(&req, received.clone());
        let req = req.map(|body| Body::new(CountingBody::new(body, received)));
        let fut = self.inner.call(req);

        Box::pin(async move {
            let response = match fut.await {
                Ok(response) => response,
                Err(never) => match never {},
            };
            Ok(pending.attach(response))
        })
    }
}

/// Request-side half of an access record, captured before the handler runs.
struct PendingRecord {
    id: RequestId,
    started: Instant,
    real_ip: String,
    method: Method,
    path: String,
    origin: String,
    declared_length: Option<u64>,
    received: ByteCounter,
}

impl PendingRecord {
    fn from_request(req: &Request<Body>, received: ByteCounter) -> Self {
        let context = match RequestContext::of(req) {
            Some(context) => context.clone(),
            None => RequestContext::new(req, &ClientAddrPolicy::default()),
        };

        let declared_length = req
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let real_ip = context
            .client_addr()
            .map(str::to_string)
            .or_else(|| {
                req.extensions()
                    .get::<ConnectInfo<std::net::SocketAddr>>()
                    .map(|ConnectInfo(peer)| peer.ip().to_string())
            })
            .unwrap_or_default();

        Self {
            id: context.id().clone(),
            started: context.started(),
            real_ip,
            method: req.method().clone(),
            path: req.uri().path().to_string(),
            origin: req
                .headers()
                .get(ORIGIN)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string(),
            declared_length,
            received,
        }
    }

    fn attach(self, response: Response<Body>) -> Response<Body> {
        let record = AccessRecord {
            status: response.status(),
            sent: 0,
            request: self,
        };
        response.map(|body| Body::new(MeteredBody::new(body, record)))
    }
}

/// Emits the access record when dropped.
struct AccessRecord {
    request: PendingRecord,
    status: StatusCode,
    sent: u64,
}

impl AccessRecord {
    fn bytes_received(&self) -> u64 {
        match self.request.received.get() {
            0 => self.request.declared_length.unwrap_or(0),
            n => n,
        }
    }
}

impl Drop for AccessRecord {
    fn drop(&mut self) {
        let duration = self.request.started.elapsed();
        let received = self.bytes_received();

        tracing::info!(
            id = %self.request.id,
            method = %self.request.method,
            path = %self.request.path,
            status = self.status.as_u16(),
            duration = ?duration,
            bytes_received = received,
            bytes_received_human = %format_bytes(received),
            bytes_sent = self.sent,
            bytes_sent_human = %format_bytes(self.sent),
            origin = %self.request.origin,
            real_ip = %self.request.real_ip,
            "handled request"
        );

        metrics::record_request(
            self.request.method.as_str(),
            self.status.as_u16(),
            duration,
            received,
            self.sent,
        );
    }
}

pin_project! {
    /// Response body that counts outgoing bytes and owns the access record.
    pub struct MeteredBody<B> {
        #[pin]
        inner: B,
        record: Option<AccessRecord>,
    }
}

impl<B> MeteredBody<B> {
    fn new(inner: B, record: AccessRecord) -> Self {
        Self { inner, record: Some(record) }
    }
}

impl<B> HttpBody for MeteredBody<B>
where
    B: HttpBody,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();
        let frame = ready!(this.inner.as_mut().poll_frame(cx));

        match &frame {
            Some(Ok(frame)) => {
                if let (Some(data), Some(record)) = (frame.data_ref(), this.record.as_mut()) {
                    record.sent += data.remaining() as u64;
                }
                if this.inner.is_end_stream() {
                    this.record.take();
                }
            }
            Some(Err(_)) => {}
            None => {
                this.record.take();
            }
        }

        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
