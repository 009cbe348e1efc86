//! Agent proxy orchestrator.
//!
//! Runs one step of a task against a [`LanguageModel`]: input guardrail,
//! generation (plain text or schema-validated object), citation
//! verification, output guardrail. Every run emits exactly one
//! `step_started` and exactly one of `step_completed`/`step_failed`.
//! The proxy never retries; retries live in the model and the
//! structured-output validator.

use crate::config::{CitationMode, RuntimeConfig};
use crate::citations::verify_citations;
use crate::events::{NoopEventSink, SecurityEventSink, StepEmitter, StepEventSink};
use crate::evidence::EvidenceProvider;
use crate::guardrails::{GuardrailsGate, GuardrailsHook};
use futures::FutureExt;
use keel_core::error::AppError;
use keel_core::event::{GuardrailStage, StepEventKind};
use keel_core::model::LanguageModel;
use keel_core::structured::{generate_object_with_retries, StructuredOptions};
use keel_core::types::{Citation, ObjectInput, RequestContext, TextInput};
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

const OUTPUT_SUMMARY_CHARS: usize = 256;

/// Result of one step
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOutput {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
}

/// Single-step orchestrator over a language model
#[derive(Debug, Clone)]
pub struct AgentProxy {
    model: Arc<dyn LanguageModel>,
    guardrails: GuardrailsGate,
    evidence: Option<Arc<dyn EvidenceProvider>>,
    step_events: Arc<dyn StepEventSink>,
}

impl AgentProxy {
    pub fn builder(model: Arc<dyn LanguageModel>) -> AgentProxyBuilder {
        AgentProxyBuilder::new(model)
    }

    /// Run one step.
    ///
    /// A panic raised while producing the output is reported as a retryable
    /// `UPSTREAM_UNAVAILABLE` failure.
    pub async fn run(
        &self,
        ctx: &RequestContext,
        config: &RuntimeConfig,
    ) -> Result<AgentOutput, AppError> {
        let events = StepEmitter::new(self.step_events.as_ref(), ctx, config);
        events.emit(StepEventKind::StepStarted {
            prompt_chars: config.prompt.chars().count(),
        });

        if let Some(max_steps) = config.workflow_policy.max_steps {
            tracing::debug!(request_id = %ctx.request_id, max_steps, "running a single step");
        }

        let result = match AssertUnwindSafe(self.execute(ctx, config, &events))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(AppError::upstream_unavailable(
                ctx,
                format!("Model call panicked: {}", panic_message(panic.as_ref())),
            )
            .with_retryable(true)),
        };

        match &result {
            Ok(output) => {
                tracing::info!(
                    request_id = %ctx.request_id,
                    task_id = %config.task_id,
                    step_id = %config.step_id,
                    "step completed"
                );
                events.emit(StepEventKind::StepCompleted {
                    output_summary: output.text.chars().take(OUTPUT_SUMMARY_CHARS).collect(),
                });
            }
            Err(error) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    task_id = %config.task_id,
                    step_id = %config.step_id,
                    code = %error.code,
                    "step failed"
                );
                events.emit(StepEventKind::StepFailed {
                    error: error.clone(),
                });
            }
        }

        result
    }

    async fn execute(
        &self,
        ctx: &RequestContext,
        config: &RuntimeConfig,
        events: &StepEmitter<'_>,
    ) -> Result<AgentOutput, AppError> {
        config.validate(ctx)?;

        self.guardrails
            .enforce(ctx, GuardrailStage::Input, &config.full_prompt())
            .await?;

        match &config.output_schema {
            Some(schema) => self.run_structured(ctx, config, schema, events).await,
            None => self.run_text(ctx, config, events).await,
        }
    }

    async fn run_structured(
        &self,
        ctx: &RequestContext,
        config: &RuntimeConfig,
        schema: &serde_json::Value,
        events: &StepEmitter<'_>,
    ) -> Result<AgentOutput, AppError> {
        let mut input = ObjectInput::new(config.prompt.clone(), schema.clone());
        input.system_prompt = config.system_prompt.clone();
        input.temperature = config.temperature;
        input.max_tokens = config.max_tokens;

        events.progress("generating");
        let output = generate_object_with_retries(
            self.model.as_ref(),
            ctx,
            input,
            StructuredOptions::new(config.structured_max_retries),
        )
        .await?;
        tracing::debug!(request_id = %ctx.request_id, attempts = output.attempts, "structured output accepted");

        let required = config.citation_mode() == CitationMode::Required;
        let citations = match output.value.get("citations") {
            None if required => {
                return Err(AppError::contract_violation(ctx, "Citations are required"));
            }
            None => None,
            Some(raw) => {
                let evidence = self.evidence.as_deref().ok_or_else(|| {
                    AppError::contract_violation(
                        ctx,
                        "Evidence provider is required to verify citations",
                    )
                })?;
                events.progress("verifying_citations");
                let verified = verify_citations(ctx, raw, evidence).await?;
                if required && verified.is_empty() {
                    return Err(AppError::contract_violation(ctx, "Citations are required")
                        .with_details(serde_json::json!({ "reason": "Empty citations" })));
                }
                Some(verified)
            }
        };

        let text = output.value.to_string();
        self.guardrails
            .enforce(ctx, GuardrailStage::Output, &text)
            .await?;

        Ok(AgentOutput {
            text,
            object: Some(output.value),
            citations,
        })
    }

    async fn run_text(
        &self,
        ctx: &RequestContext,
        config: &RuntimeConfig,
        events: &StepEmitter<'_>,
    ) -> Result<AgentOutput, AppError> {
        if config.citation_mode() == CitationMode::Required {
            return Err(AppError::contract_violation(
                ctx,
                "Citations are required but the step has no output schema",
            ));
        }

        let mut input = TextInput::new(config.prompt.clone());
        input.system_prompt = config.system_prompt.clone();
        input.temperature = config.temperature;
        input.max_tokens = config.max_tokens;

        events.progress("generating");
        let output = self.model.generate_text(ctx, input).await?;

        self.guardrails
            .enforce(ctx, GuardrailStage::Output, &output.text)
            .await?;

        Ok(AgentOutput {
            text: output.text,
            object: None,
            citations: None,
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Builder for [`AgentProxy`]
pub struct AgentProxyBuilder {
    model: Arc<dyn LanguageModel>,
    guardrails: Option<Arc<dyn GuardrailsHook>>,
    evidence: Option<Arc<dyn EvidenceProvider>>,
    step_events: Arc<dyn StepEventSink>,
    security_events: Arc<dyn SecurityEventSink>,
}

impl AgentProxyBuilder {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            guardrails: None,
            evidence: None,
            step_events: Arc::new(NoopEventSink),
            security_events: Arc::new(NoopEventSink),
        }
    }

    pub fn guardrails<G: GuardrailsHook + 'static>(self, hook: G) -> Self {
        self.guardrails_arc(Arc::new(hook))
    }

    pub fn guardrails_arc(mut self, hook: Arc<dyn GuardrailsHook>) -> Self {
        self.guardrails = Some(hook);
        self
    }

    pub fn evidence_provider(mut self, evidence: Arc<dyn EvidenceProvider>) -> Self {
        self.evidence = Some(evidence);
        self
    }

    pub fn step_events(mut self, sink: Arc<dyn StepEventSink>) -> Self {
        self.step_events = sink;
        self
    }

    pub fn security_events(mut self, sink: Arc<dyn SecurityEventSink>) -> Self {
        self.security_events = sink;
        self
    }

    pub fn build(self) -> AgentProxy {
        AgentProxy {
            model: self.model,
            guardrails: GuardrailsGate::new(self.guardrails, self.security_events),
            evidence: self.evidence,
            step_events: self.step_events,
        }
    }
}
