//! Logging middleware for model calls.

use async_trait::async_trait;
use futures::StreamExt;
use keel_core::error::AppError;
use keel_core::middleware::Middleware;
use keel_core::model::{LanguageModel, ObjectStream, TextStream};
use keel_core::types::*;
use std::time::Instant;

/// Logging middleware that logs every model call with timing information.
#[derive(Debug, Clone)]
pub struct LoggingMiddleware {
    prefix: String,
}

impl LoggingMiddleware {
    /// Create a new logging middleware
    pub fn new() -> Self {
        Self {
            prefix: "[Keel]".to_string(),
        }
    }

    /// Create a logging middleware with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn log_result<T>(&self, op: &str, ctx: &RequestContext, start: Instant, result: &Result<T, AppError>) {
        let elapsed = start.elapsed();
        match result {
            Ok(_) => tracing::debug!(
                request_id = %ctx.request_id,
                "{} {} success, elapsed={:?}",
                self.prefix,
                op,
                elapsed
            ),
            Err(e) => tracing::error!(
                request_id = %ctx.request_id,
                code = %e.code,
                "{} {} error: {}, elapsed={:?}",
                self.prefix,
                op,
                e.message,
                elapsed
            ),
        }
    }
}

impl Default for LoggingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn generate_text(
        &self,
        ctx: &RequestContext,
        input: TextInput,
        next: &dyn LanguageModel,
    ) -> Result<TextOutput, AppError> {
        tracing::debug!(
            request_id = %ctx.request_id,
            "{} generate_text request: prompt_chars={}, system_prompt={}",
            self.prefix,
            input.prompt.chars().count(),
            input.system_prompt.is_some()
        );

        let start = Instant::now();
        let result = next.generate_text(ctx, input).await;
        if let Ok(output) = &result {
            tracing::debug!(
                request_id = %ctx.request_id,
                "{} generate_text tokens={:?}",
                self.prefix,
                output.usage.map(|u| u.total_tokens)
            );
        }
        self.log_result("generate_text", ctx, start, &result);
        result
    }

    async fn generate_object(
        &self,
        ctx: &RequestContext,
        input: ObjectInput,
        next: &dyn LanguageModel,
    ) -> Result<ObjectOutput, AppError> {
        tracing::debug!(
            request_id = %ctx.request_id,
            "{} generate_object request: prompt_chars={}",
            self.prefix,
            input.prompt.chars().count()
        );

        let start = Instant::now();
        let result = next.generate_object(ctx, input).await;
        self.log_result("generate_object", ctx, start, &result);
        result
    }

    async fn stream_text(
        &self,
        ctx: &RequestContext,
        input: TextInput,
        next: &dyn LanguageModel,
    ) -> Result<TextStream, AppError> {
        tracing::debug!(
            request_id = %ctx.request_id,
            "{} stream_text request: prompt_chars={}",
            self.prefix,
            input.prompt.chars().count()
        );

        let start = Instant::now();
        let result = next.stream_text(ctx, input).await;
        self.log_result("stream_text", ctx, start, &result);

        let stream = result?;
        let prefix = self.prefix.clone();
        let request_id = ctx.request_id.clone();
        let mut first = true;
        Ok(Box::pin(stream.inspect(move |part| {
            if first && matches!(part, Ok(StreamPart::TextDelta { .. })) {
                first = false;
                tracing::debug!(
                    request_id = %request_id,
                    "{} stream_text first token after {:?}",
                    prefix,
                    start.elapsed()
                );
            }
        })))
    }

    async fn stream_object(
        &self,
        ctx: &RequestContext,
        input: ObjectInput,
        next: &dyn LanguageModel,
    ) -> Result<ObjectStream, AppError> {
        let start = Instant::now();
        let result = next.stream_object(ctx, input).await;
        self.log_result("stream_object", ctx, start, &result);
        result
    }
}
