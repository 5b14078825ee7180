//! Gzip response compression.
//!
//! # Responsibilities
//! - Negotiate gzip from the request's `Accept-Encoding`
//! - Decide from the response head whether the body should be encoded
//! - Stream the body through a gzip encoder frame by frame
//!
//! # Design Decisions
//! - The decision is taken once the response head is known, never earlier
//! - Streams (`text/event-stream`, `X-Accel-Buffering: no`) are sync-flushed
//!   after every frame so each event reaches the client immediately
//! - An encoder that cannot be built leaves the response untouched
//! - The encoder lives inside the body; it is finished at end of stream and
//!   dropped with the body otherwise

use std::convert::Infallible;
use std::io::{self, Write};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use axum::body::Body;
use axum::http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, VARY};
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use axum::BoxError;
use bytes::{BufMut, Bytes, BytesMut};
use flate2::write::GzEncoder;
use flate2::Compression;
use futures_util::future::BoxFuture;
use http_body::{Body as HttpBody, Frame};
use pin_project_lite::pin_project;
use tower::{Layer, Service};

use crate::config::CompressionConfig;

/// Layer that gzip-encodes eligible responses.
#[derive(Debug, Clone)]
pub struct CompressionLayer {
    level: u32,
    excluded: Arc<[String]>,
}

impl CompressionLayer {
    pub fn new(level: u32, excluded_content_types: &[String]) -> Self {
        Self {
            level,
            excluded: excluded_content_types
                .iter()
                .map(|prefix| prefix.to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &CompressionConfig) -> Self {
        Self::new(config.level.as_u32(), &config.excluded_content_types)
    }
}

impl<S> Layer<S> for CompressionLayer {
    type Service = Compress<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Compress {
            inner,
            level: self.level,
            excluded: self.excluded.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Compress<S> {
    inner: S,
    level: u32,
    excluded: Arc<[String]>,
}

impl<S> Service<Request<Body>> for Compress<S>
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
        let negotiated = req.method() != Method::HEAD && accepts_gzip(req.headers());
        let level = self.level;
        let excluded = self.excluded.clone();
        let fut = self.inner.call(req);

        Box::pin(async move {
            let response = match fut.await {
                Ok(response) => response,
                Err(never) => match never {},
            };

            if !negotiated || !should_compress(&response, &excluded) {
                return Ok(response);
            }

            let encoder = match gzip_encoder(level) {
                Ok(encoder) => encoder,
                Err(e) => {
                    tracing::trace!(error = %e, "gzip encoder unavailable, passing response through");
                    return Ok(response);
                }
            };

            Ok(encode(response, encoder))
        })
    }
}

fn encode(response: Response<Body>, encoder: GzEncoder<Writer>) -> Response<Body> {
    let (mut parts, body) = response.into_parts();
    let flush_frames = is_stream(&parts.headers);

    parts.headers.remove(CONTENT_LENGTH);
    parts.headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    parts.headers.append(VARY, HeaderValue::from_static("accept-encoding"));

    Response::from_parts(parts, Body::new(GzipBody::new(body, encoder, flush_frames)))
}

/// `gzip` or `*` listed with a non-zero quality.
fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|item| {
            let mut params = item.split(';');
            let coding = params.next().unwrap_or_default().trim();
            if !(coding.eq_ignore_ascii_case("gzip") || coding == "*") {
                return false;
            }
            let quality = params
                .filter_map(|p| p.trim().strip_prefix("q="))
                .next()
                .and_then(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            quality > 0.0
        })
}

fn should_compress(response: &Response<Body>, excluded: &[String]) -> bool {
    let status = response.status();
    if status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return false;
    }

    let headers = response.headers();
    if headers.contains_key(CONTENT_ENCODING) {
        return false;
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    !excluded.iter().any(|prefix| content_type.starts_with(prefix.as_str()))
}

fn is_stream(headers: &HeaderMap) -> bool {
    let event_stream = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().to_ascii_lowercase().starts_with("text/event-stream"));
    let unbuffered = headers
        .get("x-accel-buffering")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("no"));
    event_stream || unbuffered
}

fn gzip_encoder(level: u32) -> io::Result<GzEncoder<Writer>> {
    if level > 9 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("gzip level {level} is outside 0-9"),
        ));
    }
    Ok(GzEncoder::new(Writer::new(), Compression::new(level)))
}

/// Output sink the encoder writes into; drained after every frame.
#[derive(Debug, Default)]
struct Writer {
    buf: BytesMut,
}

impl Writer {
    fn new() -> Self {
        Self::default()
    }

    fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

impl Write for Writer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.put_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn encode_chunk(encoder: &mut GzEncoder<Writer>, data: &[u8], flush: bool) -> io::Result<Bytes> {
    encoder.write_all(data)?;
    if flush {
        encoder.flush()?;
    }
    Ok(encoder.get_mut().take())
}

pin_project! {
    /// Body that gzip-encodes the inner body's data frames.
    pub struct GzipBody<B> {
        #[pin]
        inner: B,
        encoder: Option<GzEncoder<Writer>>,
        flush_frames: bool,
        trailers: Option<HeaderMap>,
    }
}

impl<B> GzipBody<B> {
    fn new(inner: B, encoder: GzEncoder<Writer>, flush_frames: bool) -> Self {
        Self {
            inner,
            encoder: Some(encoder),
            flush_frames,
            trailers: None,
        }
    }
}

impl<B> HttpBody for GzipBody<B>
where
    B: HttpBody<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, BoxError>>> {
        let mut this = self.project();

        loop {
            if this.encoder.is_none() {
                // trailers go out only after the final compressed bytes
                return Poll::Ready(this.trailers.take().map(|t| Ok(Frame::trailers(t))));
            }

            match ready!(this.inner.as_mut().poll_frame(cx)) {
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(data) => {
                        let Some(encoder) = this.encoder.as_mut() else {
                            continue;
                        };
                        match encode_chunk(encoder, &data, *this.flush_frames) {
                            Ok(bytes) if bytes.is_empty() => continue,
                            Ok(bytes) => return Poll::Ready(Some(Ok(Frame::data(bytes)))),
                            Err(e) => return Poll::Ready(Some(Err(e.into()))),
                        }
                    }
                    Err(frame) => match frame.into_trailers() {
                        Ok(trailers) => *this.trailers = Some(trailers),
                        Err(_) => continue,
                    },
                },
                Some(Err(e)) => return Poll::Ready(Some(Err(e.into()))),
                None => {}
            }

            // inner body finished (or sent trailers): close the gzip stream
            let Some(encoder) = this.encoder.take() else {
                continue;
            };
            match encoder.finish() {
                Ok(mut writer) => {
                    let bytes = writer.take();
                    if !bytes.is_empty() {
                        return Poll::Ready(Some(Ok(Frame::data(bytes))));
                    }
                }
                Err(e) => return Poll::Ready(Some(Err(e.into()))),
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.encoder.is_none() && self.trailers.is_none()
    }
}
