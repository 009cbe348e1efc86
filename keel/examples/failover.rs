//! Provider failover and a guarded agent step, without network access.
//!
//! The primary adapter always fails, so every call falls back to the
//! secondary one. The agent step asks for a structured answer whose schema
//! is derived with schemars, and a guardrail rejects prompts that mention
//! credentials.

use async_trait::async_trait;
use keel::agent::EventRecorder;
use keel::cache_key::{ModelInfo, TemplateRef};
use keel::prelude::*;
use keel::runtime::InMemoryMetricsSink;
use keel::schemars::{schema_for, JsonSchema};
use keel::{AiError, GuardrailStage, ProviderCallInput, ProviderTextOutput};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug)]
struct Flaky;

#[async_trait]
impl ProviderAdapter for Flaky {
    fn id(&self) -> &str {
        "flaky"
    }

    async fn generate_text(
        &self,
        _ctx: &RequestContext,
        _input: ProviderCallInput,
    ) -> std::result::Result<ProviderTextOutput, AiError> {
        Err(AiError::provider("502 bad gateway"))
    }
}

#[derive(Debug)]
struct Steady;

#[async_trait]
impl ProviderAdapter for Steady {
    fn id(&self) -> &str {
        "steady"
    }

    async fn generate_text(
        &self,
        _ctx: &RequestContext,
        input: ProviderCallInput,
    ) -> std::result::Result<ProviderTextOutput, AiError> {
        if input.system_prompt.is_some() {
            let reply = serde_json::json!({
                "language": "Rust",
                "strengths": ["memory safety", "zero-cost abstractions"],
                "confidence": 0.9
            });
            return Ok(ProviderTextOutput::new(format!("```json\n{}\n```", reply)));
        }
        Ok(ProviderTextOutput::new(format!(
            "[{}] {}",
            input.model_id, "Rust is a systems programming language."
        )))
    }
}

/// Summary of a programming language
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct LanguageSummary {
    /// Name of the language
    language: String,
    /// Notable strengths
    strengths: Vec<String>,
    /// Confidence between 0 and 1
    #[schemars(range(min = 0.0, max = 1.0))]
    confidence: f32,
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let routing = ProviderRoutingConfig::new(ProviderRoute::new("flaky", "fast-model"))
        .with_fallback(ProviderRoute::new("steady", "steady-model"))
        .with_retry_policy(RetryPolicy::default().with_max_retries(1));

    let metrics = Arc::new(InMemoryMetricsSink::new());
    let resilient = ResilientModel::builder(routing)
        .adapter(Flaky)
        .adapter(Steady)
        .metrics(metrics.clone())
        .task_id("demo")
        .build()?;

    let model = ModelBuilder::new(resilient)
        .middleware(LoggingMiddleware::new())
        .middleware(ResponseCacheMiddleware::for_template(
            TemplateRef::new("language-qa", 1),
            ModelInfo {
                provider_id: "steady".to_string(),
                model_id: "steady-model".to_string(),
                version: "1".to_string(),
            },
        ))
        .finish();

    println!("=== Example 1: Failover ===\n");
    let ctx = RequestContext::new("tenant-a").with_project("docs");
    let output = model
        .generate_text(&ctx, TextInput::new("What is Rust?"))
        .await?;
    println!("{}", output.text);

    let cached = model
        .generate_text(&ctx, TextInput::new("What is Rust?"))
        .await?;
    println!("(cached) {}", cached.text);

    for metric in metrics.metrics() {
        println!(
            "  {} attempt {} via {}: success={}",
            metric.kind.as_str(),
            metric.attempt,
            metric.provider_id,
            metric.success
        );
    }

    println!("\n=== Example 2: Guarded structured step ===\n");
    let recorder = EventRecorder::new();
    let proxy = AgentProxy::builder(model)
        .guardrails(FnGuardrails::new("no-credentials", |stage, content| {
            if stage == GuardrailStage::Input && content.contains("password") {
                GuardrailDecision::block("credentials_in_prompt")
            } else {
                GuardrailDecision::Allow
            }
        }))
        .step_events(recorder.clone())
        .security_events(recorder.clone())
        .build();

    let schema = serde_json::to_value(schema_for!(LanguageSummary))?;
    let config = RuntimeConfig::new("demo", "step-1", "summarize", "Summarize Rust.")
        .with_output_schema(schema)
        .with_structured_max_retries(1);

    let result = proxy.run(&ctx, &config).await?;
    if let Some(object) = result.object {
        let summary: LanguageSummary = serde_json::from_value(object)?;
        println!("{:#?}", summary);
    }

    let blocked = RuntimeConfig::new("demo", "step-2", "leak", "My password is hunter2");
    if let Err(e) = proxy.run(&ctx, &blocked).await {
        println!("Blocked: {}", e);
    }

    println!("\nStep events: {:?}", recorder.step_types());
    println!("Security events: {}", recorder.security_events().len());

    Ok(())
}
