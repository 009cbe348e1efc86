//! Resilient model executor.
//!
//! [`ResilientModel`] turns a set of possibly unreliable provider adapters
//! into a single [`LanguageModel`]. Each call is routed, then every candidate
//! route is tried in order with per-candidate retries before advancing to the
//! next one. Streaming degrades to the non-streaming path when the stream
//! fails before producing any token.

use super::metrics::{MetricKind, ProviderCallMetric, ProviderMetricsSink, TracingMetricsSink};
use crate::error::{AiError, AppError};
use crate::model::{Cancellable, LanguageModel, ModelCapabilities, ObjectStream, TextStream};
use crate::provider::{ProviderAdapter, ProviderCallInput, ProviderStreamPart};
use crate::routing::{decide_provider_route, ProviderRoutingConfig, RouteDecision, RouteInput};
use crate::structured::{
    parse_json_output, try_parse_json_output, JsonModeStrategy, JsonOutputStrategy,
};
use crate::types::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Callback consulted for a routing hint when the input carries none
pub type HintResolver = Arc<dyn Fn(&RequestContext, &TextInput) -> Option<RouteHint> + Send + Sync>;

/// Builder for [`ResilientModel`].
///
/// # Example
///
/// ```ignore
/// let model = ResilientModel::builder(routing)
///     .adapter(openai)
///     .adapter(deepseek)
///     .metrics(Arc::new(InMemoryMetricsSink::new()))
///     .build()?;
/// ```
pub struct ResilientModelBuilder {
    routing: ProviderRoutingConfig,
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    metrics: Option<Arc<dyn ProviderMetricsSink>>,
    hint_resolver: Option<HintResolver>,
    task_id: Option<String>,
    json_strategy: Option<Arc<dyn JsonOutputStrategy>>,
}

impl ResilientModelBuilder {
    pub fn new(routing: ProviderRoutingConfig) -> Self {
        Self {
            routing,
            adapters: Vec::new(),
            metrics: None,
            hint_resolver: None,
            task_id: None,
            json_strategy: None,
        }
    }

    /// Register a provider adapter
    pub fn adapter<A: ProviderAdapter>(mut self, adapter: A) -> Self {
        self.adapters.push(Arc::new(adapter));
        self
    }

    /// Register a shared provider adapter
    pub fn adapter_arc(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Set the metrics sink (defaults to [`TracingMetricsSink`])
    pub fn metrics(mut self, sink: Arc<dyn ProviderMetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    /// Set the hint resolver
    pub fn hint_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&RequestContext, &TextInput) -> Option<RouteHint> + Send + Sync + 'static,
    {
        self.hint_resolver = Some(Arc::new(resolver));
        self
    }

    /// Task id attached to every metric
    pub fn task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Set the JSON output strategy used by the object methods
    ///
    /// Defaults to [`JsonModeStrategy`], which every OpenAI-compatible host supports.
    pub fn json_strategy(mut self, strategy: Arc<dyn JsonOutputStrategy>) -> Self {
        self.json_strategy = Some(strategy);
        self
    }

    /// Validate the configuration and build the model.
    ///
    /// Fails on an invalid routing config or on duplicate adapter ids.
    pub fn build(self) -> Result<ResilientModel, AiError> {
        self.routing.validate()?;

        let mut adapters = HashMap::with_capacity(self.adapters.len());
        for adapter in self.adapters {
            let id = adapter.id().to_string();
            if adapters.insert(id.clone(), adapter).is_some() {
                return Err(AiError::configuration(format!(
                    "duplicate provider adapter id '{}'",
                    id
                )));
            }
        }

        Ok(ResilientModel {
            inner: Arc::new(ResilientInner {
                routing: self.routing,
                adapters,
                metrics: self
                    .metrics
                    .unwrap_or_else(|| Arc::new(TracingMetricsSink)),
                hint_resolver: self.hint_resolver,
                task_id: self.task_id,
                json_strategy: self
                    .json_strategy
                    .unwrap_or_else(|| Arc::new(JsonModeStrategy::new())),
            }),
        })
    }
}

/// A [`LanguageModel`] that survives individual provider failures.
///
/// Cheap to clone; clones share the adapter registry.
#[derive(Clone)]
pub struct ResilientModel {
    inner: Arc<ResilientInner>,
}

struct ResilientInner {
    routing: ProviderRoutingConfig,
    /// Built once, read-only afterwards
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    metrics: Arc<dyn ProviderMetricsSink>,
    hint_resolver: Option<HintResolver>,
    task_id: Option<String>,
    json_strategy: Arc<dyn JsonOutputStrategy>,
}

impl fmt::Debug for ResilientModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&String> = self.inner.adapters.keys().collect();
        ids.sort();
        f.debug_struct("ResilientModel")
            .field("routing", &self.inner.routing)
            .field("adapters", &ids)
            .field("task_id", &self.inner.task_id)
            .field("json_strategy", &self.inner.json_strategy.name())
            .finish()
    }
}

impl ResilientModel {
    /// Create a new builder
    pub fn builder(routing: ProviderRoutingConfig) -> ResilientModelBuilder {
        ResilientModelBuilder::new(routing)
    }

    /// The routing configuration this model was built with
    pub fn routing(&self) -> &ProviderRoutingConfig {
        &self.inner.routing
    }

    /// Resolve the route decision for an input without calling anything
    pub fn decide(&self, ctx: &RequestContext, input: &TextInput) -> RouteDecision {
        self.inner.decide(ctx, input)
    }
}

/// Progress of one streaming call.
///
/// Degrading to the text path is only legal before the first token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    NotStarted,
    Streaming { tokens: usize },
    DegradedToText,
    Done,
    Failed,
}

impl StreamState {
    fn can_degrade(&self) -> bool {
        matches!(
            self,
            StreamState::NotStarted | StreamState::Streaming { tokens: 0 }
        )
    }

    /// Transition on failure
    fn fail(self) -> Self {
        if self.can_degrade() {
            StreamState::DegradedToText
        } else {
            StreamState::Failed
        }
    }
}

struct Attempt<'a> {
    kind: MetricKind,
    route: &'a ProviderRoute,
    attempt: u32,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl<'a> Attempt<'a> {
    fn start(kind: MetricKind, route: &'a ProviderRoute, attempt: u32) -> Self {
        Self {
            kind,
            route,
            attempt,
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

impl ResilientInner {
    fn decide(&self, ctx: &RequestContext, input: &TextInput) -> RouteDecision {
        let resolved = match &input.hint {
            Some(_) => None,
            None => self
                .hint_resolver
                .as_ref()
                .and_then(|resolve| resolve(ctx, input)),
        };
        let hint = input.hint.as_ref().or(resolved.as_ref());

        let decision = decide_provider_route(
            &self.routing,
            RouteInput {
                prompt: &input.prompt,
                system_prompt: input.system_prompt.as_deref(),
                hint,
            },
        );

        tracing::info!(
            request_id = %ctx.request_id,
            provider_id = %decision.selected.provider_id,
            model_id = %decision.selected.model_id,
            reason = %decision.reason,
            candidates = decision.candidates.len(),
            metadata = ?decision.metadata,
            "route decided"
        );

        decision
    }

    fn call_input(&self, route: &ProviderRoute, input: &TextInput) -> ProviderCallInput {
        ProviderCallInput {
            model_id: route.model_id.clone(),
            prompt: input.prompt.clone(),
            system_prompt: input.system_prompt.clone(),
            temperature: input.temperature,
            max_tokens: input.max_tokens,
            response_format: input.response_format.clone(),
        }
    }

    fn record(
        &self,
        ctx: &RequestContext,
        attempt: &Attempt<'_>,
        ttft_ms: Option<u64>,
        outcome: Result<Option<Usage>, &AppError>,
    ) {
        let (success, error_message, usage) = match outcome {
            Ok(usage) => (true, None, usage),
            Err(err) => (false, Some(err.message.clone()), None),
        };
        self.metrics.record(ProviderCallMetric {
            kind: attempt.kind,
            request_id: ctx.request_id.clone(),
            task_id: self.task_id.clone(),
            provider_id: attempt.route.provider_id.clone(),
            model_id: attempt.route.model_id.clone(),
            attempt: attempt.attempt,
            started_at_iso: attempt.started_at.to_rfc3339(),
            duration_ms: attempt.elapsed_ms(),
            ttft_ms,
            success,
            error_message,
            usage,
        });
    }

    async fn generate_text(
        &self,
        ctx: &RequestContext,
        input: TextInput,
    ) -> Result<TextOutput, AppError> {
        if ctx.is_cancelled() {
            return Err(AppError::cancelled(ctx));
        }

        let decision = self.decide(ctx, &input);
        let retry = self.routing.retry();
        let attempts = retry.attempts_per_candidate();
        let mut last_error: Option<AppError> = None;

        for route in &decision.candidates {
            let Some(adapter) = self.adapters.get(&route.provider_id) else {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    provider_id = %route.provider_id,
                    "no adapter registered for candidate, skipping"
                );
                last_error = Some(AppError::upstream_unavailable(
                    ctx,
                    format!("No adapter registered for provider '{}'", route.provider_id),
                ));
                continue;
            };

            for attempt in 1..=attempts {
                if ctx.is_cancelled() {
                    return Err(AppError::cancelled(ctx));
                }

                let call = Attempt::start(MetricKind::GenerateText, route, attempt);
                match adapter
                    .generate_text(ctx, self.call_input(route, &input))
                    .await
                {
                    Ok(output) => {
                        self.record(ctx, &call, None, Ok(output.usage));
                        tracing::debug!(
                            request_id = %ctx.request_id,
                            provider_id = %route.provider_id,
                            model_id = %route.model_id,
                            attempt,
                            duration_ms = call.elapsed_ms(),
                            "provider call succeeded"
                        );
                        return Ok(TextOutput {
                            text: output.text,
                            usage: output.usage,
                        });
                    }
                    Err(err) => {
                        let error = AppError::from_adapter(ctx, err);
                        self.record(ctx, &call, None, Err(&error));

                        let retry_same = error.retryable && attempt < attempts;
                        tracing::warn!(
                            request_id = %ctx.request_id,
                            provider_id = %route.provider_id,
                            model_id = %route.model_id,
                            attempt,
                            code = %error.code,
                            retryable = error.retryable,
                            will_retry = retry_same,
                            "provider call failed: {}",
                            error.message
                        );
                        last_error = Some(error);

                        if !retry_same {
                            break;
                        }

                        let delay = retry.delay_for(attempt - 1);
                        if !delay.is_zero() {
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = ctx.cancellation().cancelled() => {
                                    return Err(AppError::cancelled(ctx));
                                }
                            }
                        }
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AppError::upstream_unavailable(ctx, "No provider candidates available")
                .with_details(serde_json::json!({ "reason": decision.reason }))
        }))
    }

    fn stream_text(self: Arc<Self>, ctx: RequestContext, input: TextInput) -> TextStream {
        let token = ctx.cancellation().clone();
        let stream = async_stream::stream! {
            let decision = self.decide(&ctx, &input);
            let streaming = decision.candidates.first().and_then(|route| {
                self.adapters
                    .get(&route.provider_id)
                    .filter(|adapter| adapter.supports_streaming())
                    .map(|adapter| (route.clone(), adapter.clone()))
            });

            let mut state = StreamState::NotStarted;
            match streaming {
                None => {
                    tracing::debug!(
                        request_id = %ctx.request_id,
                        provider_id = %decision.selected.provider_id,
                        "selected provider cannot stream, degrading to text"
                    );
                    state = state.fail();
                }
                Some((route, adapter)) => {
                    let call = Attempt::start(MetricKind::StreamText, &route, 1);
                    let mut ttft_ms = None;
                    let mut usage = None;

                    match adapter.stream_text(&ctx, self.call_input(&route, &input)).await {
                        Err(err) => {
                            let error = AppError::from_adapter(&ctx, err);
                            self.record(&ctx, &call, None, Err(&error));
                            tracing::warn!(
                                request_id = %ctx.request_id,
                                provider_id = %route.provider_id,
                                "stream failed to open, degrading to text: {}",
                                error.message
                            );
                            state = state.fail();
                        }
                        Ok(mut parts) => {
                            state = StreamState::Streaming { tokens: 0 };
                            while let Some(part) = parts.next().await {
                                match part {
                                    Ok(ProviderStreamPart::Text(text)) => {
                                        if text.is_empty() {
                                            continue;
                                        }
                                        if ttft_ms.is_none() {
                                            ttft_ms = Some(call.elapsed_ms());
                                        }
                                        if let StreamState::Streaming { tokens } = state {
                                            state = StreamState::Streaming { tokens: tokens + 1 };
                                        }
                                        yield Ok(StreamPart::text(text));
                                    }
                                    Ok(ProviderStreamPart::Done { usage: done }) => {
                                        usage = done;
                                        break;
                                    }
                                    Err(err) => {
                                        let error = AppError::from_adapter(&ctx, err);
                                        self.record(&ctx, &call, ttft_ms, Err(&error));
                                        state = state.fail();
                                        if state == StreamState::Failed {
                                            tracing::warn!(
                                                request_id = %ctx.request_id,
                                                provider_id = %route.provider_id,
                                                "stream failed after partial output: {}",
                                                error.message
                                            );
                                            yield Err(error);
                                        } else {
                                            tracing::warn!(
                                                request_id = %ctx.request_id,
                                                provider_id = %route.provider_id,
                                                "stream failed before first token, degrading to text: {}",
                                                error.message
                                            );
                                        }
                                        break;
                                    }
                                }
                            }

                            if let StreamState::Streaming { .. } = state {
                                self.record(&ctx, &call, ttft_ms, Ok(usage));
                                state = StreamState::Done;
                                yield Ok(StreamPart::Done);
                            }
                        }
                    }
                }
            }

            if state == StreamState::DegradedToText {
                match self.generate_text(&ctx, input.clone()).await {
                    Ok(output) => {
                        yield Ok(StreamPart::text(output.text));
                        yield Ok(StreamPart::Done);
                    }
                    Err(error) => yield Err(error),
                }
            }
        };

        Box::pin(Cancellable::new(stream, token))
    }

    fn object_request(&self, ctx: &RequestContext, input: &ObjectInput) -> Result<TextInput, AppError> {
        self.json_strategy.apply(input).map_err(|e| {
            AppError::validation(ctx, format!("Failed to encode output schema: {}", e))
        })
    }
}

#[async_trait]
impl LanguageModel for ResilientModel {
    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities::all()
    }

    async fn generate_text(
        &self,
        ctx: &RequestContext,
        input: TextInput,
    ) -> Result<TextOutput, AppError> {
        self.inner.generate_text(ctx, input).await
    }

    async fn generate_object(
        &self,
        ctx: &RequestContext,
        input: ObjectInput,
    ) -> Result<ObjectOutput, AppError> {
        let request = self.inner.object_request(ctx, &input)?;
        let output = self.inner.generate_text(ctx, request).await?;
        let object = parse_json_output(ctx, &output.text)?;
        Ok(ObjectOutput {
            object,
            usage: output.usage,
        })
    }

    async fn stream_text(
        &self,
        ctx: &RequestContext,
        input: TextInput,
    ) -> Result<TextStream, AppError> {
        if ctx.is_cancelled() {
            return Err(AppError::cancelled(ctx));
        }
        Ok(self.inner.clone().stream_text(ctx.clone(), input))
    }

    async fn stream_object(
        &self,
        ctx: &RequestContext,
        input: ObjectInput,
    ) -> Result<ObjectStream, AppError> {
        let request = self.inner.object_request(ctx, &input)?;
        let mut parts = self.stream_text(ctx, request).await?;
        let ctx = ctx.clone();

        Ok(Box::pin(async_stream::stream! {
            let mut buffer = String::new();
            let mut last: Option<serde_json::Value> = None;

            while let Some(part) = parts.next().await {
                match part {
                    Ok(StreamPart::TextDelta { text }) => {
                        buffer.push_str(&text);
                        if let Some(value) = try_parse_json_output(&buffer) {
                            if last.as_ref() != Some(&value) {
                                last = Some(value.clone());
                                yield Ok(value);
                            }
                        }
                    }
                    Ok(StreamPart::Done) => break,
                    Err(error) => {
                        yield Err(error);
                        return;
                    }
                }
            }

            if last.is_none() && !ctx.is_cancelled() {
                if let Err(error) = parse_json_output(&ctx, &buffer) {
                    yield Err(error);
                }
            }
        }))
    }
}
