//! Security response headers.
//!
//! # Responsibilities
//! - Add hardening headers to every response
//!
//! # Design Decisions
//! - Fixed values, not configurable one by one
//! - Values set by the handler are overwritten

use std::convert::Infallible;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Request, Response};
use futures_util::future::BoxFuture;
use tower::{Layer, Service};

const HARDENING_HEADERS: [(&str, &str); 5] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    ("x-xss-protection", "0"),
    ("cross-origin-opener-policy", "same-origin"),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct HardeningHeadersLayer;

impl HardeningHeadersLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for HardeningHeadersLayer {
    type Service = HardeningHeaders<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HardeningHeaders { inner }
    }
}

#[derive(Debug, Clone)]
pub struct HardeningHeaders<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for HardeningHeaders<S>
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
        let fut = self.inner.call(req);
        Box::pin(async move {
            let mut response = match fut.await {
                Ok(response) => response,
                Err(never) => match never {},
            };
            let headers = response.headers_mut();
            for (name, value) in HARDENING_HEADERS {
                headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::ServiceExt;

    #[tokio::test]
    async fn every_response_is_hardened() {
        let service = HardeningHeadersLayer::new().layer(tower::service_fn(|_req: Request<Body>| async {
            Ok::<_, Infallible>(
                Response::builder()
                    .header("x-frame-options", "SAMEORIGIN")
                    .body(Body::empty())
                    .unwrap(),
            )
        }));

        let response = service.oneshot(Request::get("/").body(Body::empty()).unwrap()).await.unwrap();

        let headers = response.headers();
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["x-frame-options"], "DENY");
        assert_eq!(headers.get_all("x-frame-options").iter().count(), 1);
        assert_eq!(headers["referrer-policy"], "strict-origin-when-cross-origin");
        assert_eq!(headers["x-xss-protection"], "0");
        assert_eq!(headers["cross-origin-opener-policy"], "same-origin");
    }
}
