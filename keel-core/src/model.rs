//! The `LanguageModel` abstraction consumed by the orchestration layer.

use crate::error::AppError;
use crate::types::*;
use async_trait::async_trait;
use futures::Stream;
use pin_project::pin_project;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// Stream type alias for text parts
pub type TextStream = Pin<Box<dyn Stream<Item = Result<StreamPart, AppError>> + Send>>;

/// Stream type alias for progressively more complete objects
pub type ObjectStream = Pin<Box<dyn Stream<Item = Result<serde_json::Value, AppError>> + Send>>;

/// Which optional methods a model implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModelCapabilities {
    pub generate_object: bool,
    pub stream_text: bool,
    pub stream_object: bool,
}

impl ModelCapabilities {
    /// Only `generate_text`
    pub fn text_only() -> Self {
        Self::default()
    }

    /// Every optional method
    pub fn all() -> Self {
        Self {
            generate_object: true,
            stream_text: true,
            stream_object: true,
        }
    }
}

/// A language model as seen by the orchestration layer.
///
/// `generate_text` is mandatory; the other methods are optional and their
/// presence is advertised through [`capabilities`](Self::capabilities).
#[async_trait]
pub trait LanguageModel: Send + Sync + Debug + 'static {
    /// Optional methods this model implements
    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities::text_only()
    }

    /// Generate text
    async fn generate_text(
        &self,
        ctx: &RequestContext,
        input: TextInput,
    ) -> Result<TextOutput, AppError>;

    /// Generate a JSON object
    async fn generate_object(
        &self,
        ctx: &RequestContext,
        _input: ObjectInput,
    ) -> Result<ObjectOutput, AppError> {
        Err(AppError::unsupported(ctx, "generate_object"))
    }

    /// Stream text
    async fn stream_text(
        &self,
        ctx: &RequestContext,
        _input: TextInput,
    ) -> Result<TextStream, AppError> {
        Err(AppError::unsupported(ctx, "stream_text"))
    }

    /// Stream partial objects; the last item is the most complete one
    async fn stream_object(
        &self,
        ctx: &RequestContext,
        _input: ObjectInput,
    ) -> Result<ObjectStream, AppError> {
        Err(AppError::unsupported(ctx, "stream_object"))
    }
}

#[async_trait]
impl<T: LanguageModel + ?Sized> LanguageModel for Arc<T> {
    fn capabilities(&self) -> ModelCapabilities {
        (**self).capabilities()
    }

    async fn generate_text(
        &self,
        ctx: &RequestContext,
        input: TextInput,
    ) -> Result<TextOutput, AppError> {
        (**self).generate_text(ctx, input).await
    }

    async fn generate_object(
        &self,
        ctx: &RequestContext,
        input: ObjectInput,
    ) -> Result<ObjectOutput, AppError> {
        (**self).generate_object(ctx, input).await
    }

    async fn stream_text(
        &self,
        ctx: &RequestContext,
        input: TextInput,
    ) -> Result<TextStream, AppError> {
        (**self).stream_text(ctx, input).await
    }

    async fn stream_object(
        &self,
        ctx: &RequestContext,
        input: ObjectInput,
    ) -> Result<ObjectStream, AppError> {
        (**self).stream_object(ctx, input).await
    }
}

/// Helper function to collect a text stream into a single string
pub async fn collect_text_stream(mut stream: TextStream) -> Result<String, AppError> {
    use futures::StreamExt;

    let mut content = String::new();
    while let Some(part) = stream.next().await {
        match part? {
            StreamPart::TextDelta { text } => content.push_str(&text),
            StreamPart::Done => break,
        }
    }
    Ok(content)
}

/// Stream adapter that ends cleanly once a cancellation token fires.
///
/// Cancellation is checked between items; an item already produced by the
/// inner stream is never dropped half-way.
#[pin_project]
pub struct Cancellable<S> {
    #[pin]
    inner: S,
    #[pin]
    cancelled: WaitForCancellationFutureOwned,
    finished: bool,
}

impl<S> Cancellable<S> {
    pub fn new(inner: S, token: CancellationToken) -> Self {
        Self {
            inner,
            cancelled: token.cancelled_owned(),
            finished: false,
        }
    }
}

impl<S: Stream> Stream for Cancellable<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.finished {
            return Poll::Ready(None);
        }
        if this.cancelled.poll(cx).is_ready() {
            *this.finished = true;
            return Poll::Ready(None);
        }
        let item = futures::ready!(this.inner.poll_next(cx));
        if item.is_none() {
            *this.finished = true;
        }
        Poll::Ready(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_collect_text_stream() {
        let parts: Vec<Result<StreamPart, AppError>> = vec![
            Ok(StreamPart::text("Hello, ")),
            Ok(StreamPart::text("world")),
            Ok(StreamPart::Done),
        ];
        let stream: TextStream = Box::pin(futures::stream::iter(parts));
        assert_eq!(collect_text_stream(stream).await.unwrap(), "Hello, world");
    }

    #[tokio::test]
    async fn test_cancellable_stops_between_items() {
        let token = CancellationToken::new();
        let mut stream = Box::pin(Cancellable::new(
            futures::stream::iter(1..=5),
            token.clone(),
        ));

        assert_eq!(stream.next().await, Some(1));
        assert_eq!(stream.next().await, Some(2));
        token.cancel();
        assert_eq!(stream.next().await, None);
        assert_eq!(stream.next().await, None);
    }
}
