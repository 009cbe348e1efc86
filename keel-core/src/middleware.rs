//! Middleware chain.
//!
//! Middlewares provide a composable way to wrap a language model with
//! cross-cutting concerns like logging, auth, caching, etc.
//!
//! Composition is onion-style: the first middleware in the list is the
//! outermost. Every method has a forwarding default, so a middleware only
//! overrides what it wants to intercept. Returning without calling `next`
//! short-circuits every inner middleware and the base model.

use crate::error::AppError;
use crate::model::{LanguageModel, ModelCapabilities, ObjectStream, TextStream};
use crate::types::*;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// A cross-cutting behavior wrapped around a [`LanguageModel`].
///
/// `next` is the rest of the chain: the next enabled middleware, or
/// ultimately the base model.
#[async_trait]
pub trait Middleware: Send + Sync + Debug + 'static {
    /// Middleware name, for logs
    fn name(&self) -> &str;

    /// When false the middleware is skipped for this call
    fn enabled(&self, _ctx: &RequestContext) -> bool {
        true
    }

    async fn generate_text(
        &self,
        ctx: &RequestContext,
        input: TextInput,
        next: &dyn LanguageModel,
    ) -> Result<TextOutput, AppError> {
        next.generate_text(ctx, input).await
    }

    async fn generate_object(
        &self,
        ctx: &RequestContext,
        input: ObjectInput,
        next: &dyn LanguageModel,
    ) -> Result<ObjectOutput, AppError> {
        next.generate_object(ctx, input).await
    }

    async fn stream_text(
        &self,
        ctx: &RequestContext,
        input: TextInput,
        next: &dyn LanguageModel,
    ) -> Result<TextStream, AppError> {
        next.stream_text(ctx, input).await
    }

    async fn stream_object(
        &self,
        ctx: &RequestContext,
        input: ObjectInput,
        next: &dyn LanguageModel,
    ) -> Result<ObjectStream, AppError> {
        next.stream_object(ctx, input).await
    }
}

/// One layer of the onion: a middleware and everything inside it.
#[derive(Debug)]
pub struct MiddlewareModel {
    middleware: Arc<dyn Middleware>,
    inner: Arc<dyn LanguageModel>,
}

impl MiddlewareModel {
    pub fn new(middleware: Arc<dyn Middleware>, inner: Arc<dyn LanguageModel>) -> Self {
        Self { middleware, inner }
    }
}

#[async_trait]
impl LanguageModel for MiddlewareModel {
    fn capabilities(&self) -> ModelCapabilities {
        self.inner.capabilities()
    }

    async fn generate_text(
        &self,
        ctx: &RequestContext,
        input: TextInput,
    ) -> Result<TextOutput, AppError> {
        if !self.middleware.enabled(ctx) {
            return self.inner.generate_text(ctx, input).await;
        }
        self.middleware
            .generate_text(ctx, input, self.inner.as_ref())
            .await
    }

    async fn generate_object(
        &self,
        ctx: &RequestContext,
        input: ObjectInput,
    ) -> Result<ObjectOutput, AppError> {
        if !self.capabilities().generate_object {
            return Err(AppError::unsupported(ctx, "generate_object"));
        }
        if !self.middleware.enabled(ctx) {
            return self.inner.generate_object(ctx, input).await;
        }
        self.middleware
            .generate_object(ctx, input, self.inner.as_ref())
            .await
    }

    async fn stream_text(
        &self,
        ctx: &RequestContext,
        input: TextInput,
    ) -> Result<TextStream, AppError> {
        if !self.capabilities().stream_text {
            return Err(AppError::unsupported(ctx, "stream_text"));
        }
        if !self.middleware.enabled(ctx) {
            return self.inner.stream_text(ctx, input).await;
        }
        self.middleware
            .stream_text(ctx, input, self.inner.as_ref())
            .await
    }

    async fn stream_object(
        &self,
        ctx: &RequestContext,
        input: ObjectInput,
    ) -> Result<ObjectStream, AppError> {
        if !self.capabilities().stream_object {
            return Err(AppError::unsupported(ctx, "stream_object"));
        }
        if !self.middleware.enabled(ctx) {
            return self.inner.stream_object(ctx, input).await;
        }
        self.middleware
            .stream_object(ctx, input, self.inner.as_ref())
            .await
    }
}

/// Wrap `base` with `middlewares`; the first middleware ends up outermost.
pub fn wrap_language_model(
    base: Arc<dyn LanguageModel>,
    middlewares: Vec<Arc<dyn Middleware>>,
) -> Arc<dyn LanguageModel> {
    middlewares
        .into_iter()
        .rev()
        .fold(base, |inner, middleware| {
            Arc::new(MiddlewareModel::new(middleware, inner)) as Arc<dyn LanguageModel>
        })
}

/// Builder for composing a model with middlewares.
///
/// ```ignore
/// let model = ModelBuilder::new(resilient)
///     .middleware(LoggingMiddleware::new())
///     .middleware(ResponseCacheMiddleware::new(key_fn))
///     .finish();
/// ```
pub struct ModelBuilder {
    base: Arc<dyn LanguageModel>,
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl ModelBuilder {
    /// Create a new builder around a base model
    pub fn new<M: LanguageModel>(base: M) -> Self {
        Self {
            base: Arc::new(base),
            middlewares: Vec::new(),
        }
    }

    /// Add a middleware; earlier middlewares wrap later ones
    pub fn middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Add a shared middleware
    pub fn middleware_arc(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Finish building
    pub fn finish(self) -> Arc<dyn LanguageModel> {
        wrap_language_model(self.base, self.middlewares)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::collect_text_stream;
    use parking_lot::Mutex;
    use proptest::prelude::*;

    type Trace = Arc<Mutex<Vec<String>>>;

    #[derive(Debug)]
    struct BaseModel {
        trace: Trace,
        streaming: bool,
    }

    #[async_trait]
    impl LanguageModel for BaseModel {
        fn capabilities(&self) -> ModelCapabilities {
            ModelCapabilities {
                stream_text: self.streaming,
                ..Default::default()
            }
        }

        async fn generate_text(
            &self,
            _ctx: &RequestContext,
            input: TextInput,
        ) -> Result<TextOutput, AppError> {
            self.trace.lock().push("base".to_string());
            Ok(TextOutput::new(format!("echo:{}", input.prompt)))
        }

        async fn stream_text(
            &self,
            _ctx: &RequestContext,
            _input: TextInput,
        ) -> Result<TextStream, AppError> {
            self.trace.lock().push("base:stream".to_string());
            let parts: Vec<Result<StreamPart, AppError>> =
                vec![Ok(StreamPart::text("a")), Ok(StreamPart::text("b")), Ok(StreamPart::Done)];
            Ok(Box::pin(futures::stream::iter(parts)))
        }
    }

    #[derive(Debug)]
    struct Tracing {
        name: String,
        trace: Trace,
        enabled: bool,
    }

    #[async_trait]
    impl Middleware for Tracing {
        fn name(&self) -> &str {
            &self.name
        }

        fn enabled(&self, _ctx: &RequestContext) -> bool {
            self.enabled
        }

        async fn generate_text(
            &self,
            ctx: &RequestContext,
            input: TextInput,
            next: &dyn LanguageModel,
        ) -> Result<TextOutput, AppError> {
            self.trace.lock().push(format!("{}:before", self.name));
            let result = next.generate_text(ctx, input).await;
            self.trace.lock().push(format!("{}:after", self.name));
            result
        }
    }

    #[derive(Debug)]
    struct ShortCircuit;

    #[async_trait]
    impl Middleware for ShortCircuit {
        fn name(&self) -> &str {
            "short-circuit"
        }

        async fn generate_text(
            &self,
            _ctx: &RequestContext,
            _input: TextInput,
            _next: &dyn LanguageModel,
        ) -> Result<TextOutput, AppError> {
            Ok(TextOutput::new("cached"))
        }
    }

    /// Implements nothing; every call falls through.
    #[derive(Debug)]
    struct Silent;

    #[async_trait]
    impl Middleware for Silent {
        fn name(&self) -> &str {
            "silent"
        }
    }

    fn base(trace: &Trace, streaming: bool) -> Arc<dyn LanguageModel> {
        Arc::new(BaseModel {
            trace: trace.clone(),
            streaming,
        })
    }

    fn tracing_mw(name: &str, trace: &Trace, enabled: bool) -> Arc<dyn Middleware> {
        Arc::new(Tracing {
            name: name.to_string(),
            trace: trace.clone(),
            enabled,
        })
    }

    async fn run_chain(count: usize) -> Vec<String> {
        let trace: Trace = Arc::default();
        let middlewares = (0..count)
            .map(|i| tracing_mw(&format!("mw{}", i), &trace, true))
            .collect();
        let model = wrap_language_model(base(&trace, false), middlewares);
        let ctx = RequestContext::new("tenant");
        model.generate_text(&ctx, TextInput::new("hi")).await.unwrap();
        let calls = trace.lock().clone();
        calls
    }

    proptest! {
        #[test]
        fn prop_onion_order(count in 0usize..8) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let calls = runtime.block_on(run_chain(count));

            let mut expected: Vec<String> = (0..count).map(|i| format!("mw{}:before", i)).collect();
            expected.push("base".to_string());
            expected.extend((0..count).rev().map(|i| format!("mw{}:after", i)));
            prop_assert_eq!(calls, expected);
        }
    }

    #[tokio::test]
    async fn test_short_circuit_skips_inner() {
        let trace: Trace = Arc::default();
        let model = wrap_language_model(
            base(&trace, false),
            vec![
                tracing_mw("outer", &trace, true),
                Arc::new(ShortCircuit),
                tracing_mw("inner", &trace, true),
            ],
        );
        let ctx = RequestContext::new("tenant");
        let output = model.generate_text(&ctx, TextInput::new("hi")).await.unwrap();

        assert_eq!(output.text, "cached");
        assert_eq!(*trace.lock(), vec!["outer:before", "outer:after"]);
    }

    #[tokio::test]
    async fn test_disabled_and_silent_are_transparent() {
        let trace: Trace = Arc::default();
        let model = ModelBuilder::new(base(&trace, false))
            .middleware_arc(tracing_mw("off", &trace, false))
            .middleware(Silent)
            .middleware_arc(tracing_mw("on", &trace, true))
            .finish();
        let ctx = RequestContext::new("tenant");
        let output = model.generate_text(&ctx, TextInput::new("x")).await.unwrap();

        assert_eq!(output.text, "echo:x");
        assert_eq!(*trace.lock(), vec!["on:before", "base", "on:after"]);
    }

    #[tokio::test]
    async fn test_stream_passes_through() {
        let trace: Trace = Arc::default();
        let model = wrap_language_model(base(&trace, true), vec![Arc::new(Silent)]);
        let ctx = RequestContext::new("tenant");
        let stream = model.stream_text(&ctx, TextInput::new("x")).await.unwrap();
        assert_eq!(collect_text_stream(stream).await.unwrap(), "ab");
    }

    #[tokio::test]
    async fn test_no_synthetic_streaming() {
        let trace: Trace = Arc::default();
        let model = wrap_language_model(base(&trace, false), vec![Arc::new(Silent)]);
        assert!(!model.capabilities().stream_text);

        let ctx = RequestContext::new("tenant");
        assert!(model.stream_text(&ctx, TextInput::new("x")).await.is_err());
        assert!(trace.lock().is_empty());
    }
}
