//! Request pipeline composition.
//!
//! # Responsibilities
//! - Define the `Handler` every layer wraps and the `Decorator` seam
//! - Compose an ordered decorator list around a terminal handler
//! - Build the default pipeline from configuration
//!
//! # Design Decisions
//! - Composition is right-to-left: the first decorator is outermost
//! - Any `tower::Layer` producing a valid handler is a decorator
//! - The request entry stage is always composed first so every
//!   decorator sees a `RequestContext`

use std::convert::Infallible;

use axum::body::Body;
use axum::http::{Request, Response};
use tower::util::BoxCloneService;
use tower::{Layer, Service};

use crate::config::GatewayConfig;
use crate::http::request::RequestEntryLayer;
use crate::http::middleware::{CompressionLayer, MeteringLayer, RecoverLayer};
use crate::security::{cors_layer, HardeningHeadersLayer};

/// A boxed request handler: one request in, one response out.
pub type Handler = BoxCloneService<Request<Body>, Response<Body>, Infallible>;

/// Box any compatible service into a [`Handler`].
pub fn boxed<S>(service: S) -> Handler
where
    S: Service<Request<Body>, Response = Response<Body>, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    BoxCloneService::new(service)
}

/// Transforms a handler into a wrapped handler.
pub trait Decorator: Send + Sync {
    fn decorate(&self, handler: Handler) -> Handler;
}

impl<L> Decorator for L
where
    L: Layer<Handler> + Send + Sync,
    L::Service: Service<Request<Body>, Response = Response<Body>, Error = Infallible>
        + Clone
        + Send
        + 'static,
    <L::Service as Service<Request<Body>>>::Future: Send + 'static,
{
    fn decorate(&self, handler: Handler) -> Handler {
        boxed(self.layer(handler))
    }
}

/// A decorator backed by a closure.
#[derive(Clone, Copy)]
pub struct DecoratorFn<F> {
    f: F,
}

pub fn decorator_fn<F>(f: F) -> DecoratorFn<F>
where
    F: Fn(Handler) -> Handler + Send + Sync,
{
    DecoratorFn { f }
}

impl<F> Decorator for DecoratorFn<F>
where
    F: Fn(Handler) -> Handler + Send + Sync,
{
    fn decorate(&self, handler: Handler) -> Handler {
        (self.f)(handler)
    }
}

/// Wrap `terminal` with `decorators`, the first one ending up outermost.
pub fn compose(terminal: Handler, decorators: &[Box<dyn Decorator>]) -> Handler {
    decorators
        .iter()
        .rev()
        .fold(terminal, |handler, decorator| decorator.decorate(handler))
}

/// An ordered decorator list behind the request entry stage.
pub struct Pipeline {
    entry: RequestEntryLayer,
    decorators: Vec<Box<dyn Decorator>>,
}

impl Pipeline {
    /// Start an empty pipeline with the given entry stage.
    pub fn new(entry: RequestEntryLayer) -> Self {
        Self { entry, decorators: Vec::new() }
    }

    /// The default pipeline:
    /// entry → hardening headers → compression → metering → CORS → recover.
    ///
    /// CORS answers preflights itself, so it sits inside the layers that
    /// must see every response.
    pub fn standard(config: &GatewayConfig) -> Self {
        let mut pipeline = Pipeline::new(RequestEntryLayer::from_config(config));

        if config.security.enable_headers {
            pipeline = pipeline.with(HardeningHeadersLayer::new());
        }
        if config.compression.enabled {
            pipeline = pipeline.with(CompressionLayer::from_config(&config.compression));
        }
        pipeline = pipeline.with(MeteringLayer::new());
        if let Some(cors) = cors_layer(&config.cors) {
            pipeline = pipeline.with(cors);
        }

        pipeline.with(RecoverLayer::new())
    }

    /// Append a decorator; it runs inside every decorator added before it.
    pub fn with<D: Decorator + 'static>(mut self, decorator: D) -> Self {
        self.decorators.push(Box::new(decorator));
        self
    }

    /// Number of decorators, not counting the entry stage.
    pub fn len(&self) -> usize {
        self.decorators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decorators.is_empty()
    }

    /// Compose the pipeline around `terminal`.
    pub fn build(&self, terminal: Handler) -> Handler {
        let inner = compose(terminal, &self.decorators);
        self.entry.decorate(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::BoxFuture;
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};
    use tower::ServiceExt;

    type Journal = Arc<Mutex<Vec<String>>>;

    #[derive(Clone)]
    struct RecordLayer {
        name: &'static str,
        journal: Journal,
    }

    #[derive(Clone)]
    struct Record<S> {
        name: &'static str,
        journal: Journal,
        inner: S,
    }

    impl<S> Layer<S> for RecordLayer {
        type Service = Record<S>;

        fn layer(&self, inner: S) -> Self::Service {
            Record { name: self.name, journal: self.journal.clone(), inner }
        }
    }

    impl<S> Service<Request<Body>> for Record<S>
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
            let name = self.name;
            let journal = self.journal.clone();
            journal.lock().unwrap().push(format!("{name}:in"));
            let fut = self.inner.call(req);
            Box::pin(async move {
                let response = fut.await;
                journal.lock().unwrap().push(format!("{name}:out"));
                response
            })
        }
    }

    fn terminal(journal: Journal) -> Handler {
        boxed(tower::service_fn(move |_req: Request<Body>| {
            let journal = journal.clone();
            async move {
                journal.lock().unwrap().push("handler".to_string());
                Ok::<_, Infallible>(Response::new(Body::from("done")))
            }
        }))
    }

    fn request() -> Request<Body> {
        Request::builder().uri("/api/tasks").body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn first_decorator_runs_first_and_unwinds_last() {
        let journal = Journal::default();
        let decorators: Vec<Box<dyn Decorator>> = ["d1", "d2", "d3"]
            .into_iter()
            .map(|name| Box::new(RecordLayer { name, journal: journal.clone() }) as Box<dyn Decorator>)
            .collect();

        let handler = compose(terminal(journal.clone()), &decorators);
        handler.oneshot(request()).await.unwrap();

        assert_eq!(
            *journal.lock().unwrap(),
            vec!["d1:in", "d2:in", "d3:in", "handler", "d3:out", "d2:out", "d1:out"]
        );
    }

    #[tokio::test]
    async fn order_is_identical_for_every_request() {
        let journal = Journal::default();
        let decorators: Vec<Box<dyn Decorator>> = vec![
            Box::new(RecordLayer { name: "outer", journal: journal.clone() }),
            Box::new(RecordLayer { name: "inner", journal: journal.clone() }),
        ];
        let handler = compose(terminal(journal.clone()), &decorators);

        handler.clone().oneshot(request()).await.unwrap();
        let first = journal.lock().unwrap().drain(..).collect::<Vec<_>>();
        handler.oneshot(request()).await.unwrap();
        let second = journal.lock().unwrap().drain(..).collect::<Vec<_>>();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn no_decorators_is_identity() {
        let journal = Journal::default();
        let handler = compose(terminal(journal.clone()), &[]);

        let response = handler.oneshot(request()).await.unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(*journal.lock().unwrap(), vec!["handler"]);
    }

    #[tokio::test]
    async fn closures_are_decorators() {
        let journal = Journal::default();
        let recorded = journal.clone();
        let decorators: Vec<Box<dyn Decorator>> = vec![Box::new(decorator_fn(move |handler| {
            recorded.lock().unwrap().push("decorated".to_string());
            handler
        }))];

        let handler = compose(terminal(journal.clone()), &decorators);
        handler.oneshot(request()).await.unwrap();

        assert_eq!(*journal.lock().unwrap(), vec!["decorated", "handler"]);
    }

    #[tokio::test]
    async fn standard_pipeline_tags_every_response() {
        let pipeline = Pipeline::standard(&GatewayConfig::default());
        assert_eq!(pipeline.len(), 4);

        let handler = pipeline.build(terminal(Journal::default()));
        let response = handler.oneshot(request()).await.unwrap();

        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(response.headers()["cache-control"], "no-store");
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    }
}
