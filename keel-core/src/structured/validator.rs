//! Structured-output validation with bounded retries.
//!
//! The model is asked for an object, the object is validated against the
//! schema, and on mismatch the same request is sent again (no prompt repair)
//! up to `max_retries` more times.

use super::schema::ObjectSchema;
use crate::error::{AppError, ErrorCode};
use crate::model::LanguageModel;
use crate::types::{ObjectInput, RequestContext, ValidationIssue};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

/// Retry bound for structured output
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StructuredOptions {
    /// Additional attempts after the first one
    pub max_retries: u32,
}

impl StructuredOptions {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }
}

/// A schema-valid object and the number of attempts it took
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredOutput {
    pub value: serde_json::Value,
    pub attempts: u32,
}

/// Structured generation failed after `attempts` attempts
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error} (after {attempts} attempts)")]
pub struct StructuredError {
    pub error: AppError,
    pub attempts: u32,
}

impl From<StructuredError> for AppError {
    fn from(err: StructuredError) -> Self {
        err.error
    }
}

enum Attempt {
    Valid(serde_json::Value),
    Invalid(Vec<ValidationIssue>),
}

/// Generate an object and validate it, retrying on schema mismatch.
pub async fn generate_object_with_retries(
    model: &dyn LanguageModel,
    ctx: &RequestContext,
    input: ObjectInput,
    options: StructuredOptions,
) -> Result<StructuredOutput, StructuredError> {
    run_with_retries(ctx, &input, options, |input| async move {
        model
            .generate_object(ctx, input)
            .await
            .map(|output| Some(output.object))
    })
    .await
}

/// Streaming variant of [`generate_object_with_retries`].
///
/// The final object is the last complete object observed on the stream.
/// Models without streaming-object support fall back to the non-streaming path.
pub async fn stream_object_with_retries(
    model: &dyn LanguageModel,
    ctx: &RequestContext,
    input: ObjectInput,
    options: StructuredOptions,
) -> Result<StructuredOutput, StructuredError> {
    if !model.capabilities().stream_object {
        tracing::debug!(
            request_id = %ctx.request_id,
            "model has no stream_object, using generate_object"
        );
        return generate_object_with_retries(model, ctx, input, options).await;
    }

    run_with_retries(ctx, &input, options, |input| async move {
        let mut stream = model.stream_object(ctx, input).await?;
        let mut last = None;
        while let Some(item) = stream.next().await {
            last = Some(item?);
        }
        Ok(last)
    })
    .await
}

async fn run_with_retries<F, Fut>(
    ctx: &RequestContext,
    input: &ObjectInput,
    options: StructuredOptions,
    mut produce: F,
) -> Result<StructuredOutput, StructuredError>
where
    F: FnMut(ObjectInput) -> Fut,
    Fut: std::future::Future<Output = Result<Option<serde_json::Value>, AppError>>,
{
    let schema = ObjectSchema::compile(ctx, &input.schema)
        .map_err(|error| StructuredError { error, attempts: 0 })?;
    let max_attempts = options.max_retries.saturating_add(1);
    let mut last_issues = Vec::new();

    for attempt in 1..=max_attempts {
        let outcome = match produce(input.clone()).await {
            Ok(Some(value)) => match schema.validate(&value) {
                Ok(()) => Attempt::Valid(value),
                Err(issues) => Attempt::Invalid(issues),
            },
            Ok(None) => Attempt::Invalid(vec![ValidationIssue::new(
                "",
                "Model produced no object",
                "missing_object",
            )]),
            // Unparseable output counts as a failed attempt, anything else is terminal.
            Err(error) if error.code == ErrorCode::ContractViolation => {
                Attempt::Invalid(vec![ValidationIssue::new("", error.message, "invalid_json")])
            }
            Err(error) => {
                return Err(StructuredError {
                    error: error.for_context(ctx),
                    attempts: attempt,
                })
            }
        };

        match outcome {
            Attempt::Valid(value) => {
                return Ok(StructuredOutput {
                    value,
                    attempts: attempt,
                })
            }
            Attempt::Invalid(issues) => {
                tracing::debug!(
                    request_id = %ctx.request_id,
                    attempt,
                    max_attempts,
                    issues = issues.len(),
                    "structured output failed validation"
                );
                last_issues = issues;
            }
        }
    }

    let error = AppError::contract_violation(
        ctx,
        format!(
            "Structured output failed schema validation after {} attempts",
            max_attempts
        ),
    )
    .with_details(serde_json::json!({
        "attempts": max_attempts,
        "issues": last_issues,
    }));

    Err(StructuredError {
        error,
        attempts: max_attempts,
    })
}
