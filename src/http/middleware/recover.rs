//! Panic containment.
//!
//! A panic raised while the wrapped handler is being called, or while its
//! response future is polled, becomes a `500` instead of tearing down the
//! connection task. Panics in layers outside this one, and panics while the
//! response body streams, are not intercepted.

use std::any::Any;
use std::convert::Infallible;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Request, Response, StatusCode};
use futures_util::future::{BoxFuture, FutureExt};
use tower::{Layer, Service};

use crate::http::request::RequestContext;

const MAX_SUMMARY_CHARS: usize = 128;

#[derive(Debug, Clone, Copy, Default)]
pub struct RecoverLayer;

impl RecoverLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RecoverLayer {
    type Service = Recover<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Recover { inner }
    }
}

#[derive(Debug, Clone)]
pub struct Recover<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for Recover<S>
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
        let id = RequestContext::of(&req)
            .map(|ctx| ctx.id().to_string())
            .unwrap_or_default();

        let fut = match catch_unwind(AssertUnwindSafe(|| self.inner.call(req))) {
            Ok(fut) => fut,
            Err(payload) => {
                let response = recovered(&id, payload.as_ref());
                return Box::pin(async move { Ok(response) });
            }
        };

        Box::pin(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(never)) => match never {},
                Err(payload) => Ok(recovered(&id, payload.as_ref())),
            }
        })
    }
}

fn recovered(id: &str, payload: &(dyn Any + Send)) -> Response<Body> {
    let summary = panic_summary(payload);
    tracing::error!(id = %id, error = %summary, "server panic recovered");

    let mut response = Response::new(Body::from(format!("server panicked with error: {summary}")));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// First line of the panic message, at most 128 characters.
pub fn panic_summary(payload: &(dyn Any + Send)) -> String {
    let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    };

    message
        .lines()
        .next()
        .unwrap_or_default()
        .chars()
        .take(MAX_SUMMARY_CHARS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::pipeline::{boxed, Handler, Pipeline};
    use crate::http::request::RequestEntryLayer;
    use crate::observability::logging::capture;
    use futures_util::future::Ready;
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn request(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    async fn text(response: Response<Body>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn panics_on_boom() -> Handler {
        boxed(tower::service_fn(|req: Request<Body>| async move {
            if req.uri().path() == "/boom" {
                panic!("task store exploded");
            }
            Ok::<_, Infallible>(Response::new(Body::from("fine")))
        }))
    }

    #[tokio::test]
    async fn panic_in_response_future_becomes_500() {
        let (_guard, logs) = capture();
        let handler = Pipeline::new(RequestEntryLayer::default())
            .with(RecoverLayer::new())
            .build(panics_on_boom());

        let response = handler.clone().oneshot(request("/boom")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let id = response.headers()["x-request-id"].to_str().unwrap().to_string();
        assert_eq!(text(response).await, "server panicked with error: task store exploded");

        let records = logs.with_message("server panic recovered");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], id.as_str());
        assert_eq!(records[0]["error"], "task store exploded");
        assert_eq!(records[0]["level"], "ERROR");

        let response = handler.oneshot(request("/ok")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(text(response).await, "fine");
    }

    #[derive(Clone)]
    struct PanicsInCall {
        calls: Arc<AtomicUsize>,
    }

    impl Service<Request<Body>> for PanicsInCall {
        type Response = Response<Body>;
        type Error = Infallible;
        type Future = Ready<Result<Response<Body>, Infallible>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: Request<Body>) -> Self::Future {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("{}", "x".repeat(300));
            }
            futures_util::future::ready(Ok(Response::new(Body::empty())))
        }
    }

    #[tokio::test]
    async fn panic_during_call_is_contained_and_truncated() {
        let (_guard, _logs) = capture();
        let handler = RecoverLayer::new().layer(PanicsInCall { calls: Arc::default() });

        let response = handler.clone().oneshot(request("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = text(response).await;
        assert_eq!(body, format!("server panicked with error: {}", "x".repeat(128)));

        let response = handler.oneshot(request("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn summary_keeps_first_line() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("first line\nsecond line"));
        assert_eq!(panic_summary(payload.as_ref()), "first line");

        let payload: Box<dyn Any + Send> = Box::new(17u8);
        assert_eq!(panic_summary(payload.as_ref()), "unknown panic");
    }
}
