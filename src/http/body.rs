//! Body wrappers that observe bytes as they stream.
//!
//! Counting happens per data frame as the consumer polls, so a body that
//! is only partially read reports only what was actually read.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use bytes::Buf;
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;

/// Shared byte tally, cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ByteCounter(Arc<AtomicU64>);

impl ByteCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

pin_project! {
    /// Passes frames through unchanged, adding data frame lengths to a counter.
    pub struct CountingBody<B> {
        #[pin]
        inner: B,
        counter: ByteCounter,
    }
}

impl<B> CountingBody<B> {
    pub fn new(inner: B, counter: ByteCounter) -> Self {
        Self { inner, counter }
    }
}

impl<B> Body for CountingBody<B>
where
    B: Body,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let frame = ready!(this.inner.poll_frame(cx));
        if let Some(Ok(frame)) = &frame {
            if let Some(data) = frame.data_ref() {
                this.counter.add(data.remaining() as u64);
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

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full, StreamBody};
    use std::convert::Infallible;

    fn chunks(parts: &[&'static str]) -> StreamBody<impl futures_util::Stream<Item = Result<Frame<Bytes>, Infallible>>> {
        let frames: Vec<Result<Frame<Bytes>, Infallible>> = parts
            .iter()
            .map(|part| Ok(Frame::data(Bytes::from_static(part.as_bytes()))))
            .collect();
        StreamBody::new(futures_util::stream::iter(frames))
    }

    #[tokio::test]
    async fn counts_every_data_frame() {
        let counter = ByteCounter::new();
        let body = CountingBody::new(chunks(&["hello ", "streaming ", "world"]), counter.clone());

        let collected = body.collect().await.unwrap().to_bytes();

        assert_eq!(collected, "hello streaming world");
        assert_eq!(counter.get(), 21);
    }

    #[tokio::test]
    async fn partial_reads_count_only_what_was_read() {
        let counter = ByteCounter::new();
        let mut body = CountingBody::new(chunks(&["abcd", "efgh", "ijkl"]), counter.clone());

        let first = body.frame().await.unwrap().unwrap();
        assert_eq!(first.into_data().unwrap(), "abcd");
        drop(body);

        assert_eq!(counter.get(), 4);
    }

    #[tokio::test]
    async fn trailers_are_not_counted() {
        let mut trailers = axum::http::HeaderMap::new();
        trailers.insert("grpc-status", "0".parse().unwrap());
        let frames: Vec<Result<Frame<Bytes>, Infallible>> = vec![
            Ok(Frame::data(Bytes::from_static(b"payload"))),
            Ok(Frame::trailers(trailers)),
        ];
        let counter = ByteCounter::new();
        let body = CountingBody::new(StreamBody::new(futures_util::stream::iter(frames)), counter.clone());

        let collected = body.collect().await.unwrap();

        assert!(collected.trailers().is_some());
        assert_eq!(counter.get(), 7);
    }

    #[tokio::test]
    async fn size_hint_is_forwarded() {
        let body = CountingBody::new(Full::new(Bytes::from_static(b"12345")), ByteCounter::new());
        assert_eq!(body.size_hint().exact(), Some(5));
    }
}
