//! Guardrail hooks.
//!
//! A hook inspects content at a [`GuardrailStage`] and allows or blocks it.
//! [`GuardrailsGate`] turns a block into a `GUARDRAIL_BLOCKED` error and a
//! security event.

use crate::events::SecurityEventSink;
use async_trait::async_trait;
use keel_core::error::{AppError, ErrorCode};
use keel_core::event::{GuardrailBlockedPayload, GuardrailStage, SecurityEvent};
use keel_core::types::RequestContext;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;

/// Outcome of a guardrail check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GuardrailDecision {
    Allow,
    Block { reason: String },
}

impl GuardrailDecision {
    pub fn block(reason: impl Into<String>) -> Self {
        GuardrailDecision::Block {
            reason: reason.into(),
        }
    }
}

/// Content policy hook
#[async_trait]
pub trait GuardrailsHook: Send + Sync + fmt::Debug {
    async fn check(
        &self,
        ctx: &RequestContext,
        stage: GuardrailStage,
        content: &str,
    ) -> anyhow::Result<GuardrailDecision>;
}

type CheckFn = Arc<dyn Fn(GuardrailStage, &str) -> GuardrailDecision + Send + Sync>;

/// Guardrail backed by a plain function
#[derive(Clone)]
pub struct FnGuardrails {
    name: String,
    check: CheckFn,
}

impl FnGuardrails {
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(GuardrailStage, &str) -> GuardrailDecision + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }
}

impl fmt::Debug for FnGuardrails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnGuardrails").field("name", &self.name).finish()
    }
}

#[async_trait]
impl GuardrailsHook for FnGuardrails {
    async fn check(
        &self,
        _ctx: &RequestContext,
        stage: GuardrailStage,
        content: &str,
    ) -> anyhow::Result<GuardrailDecision> {
        Ok((self.check)(stage, content))
    }
}

/// Runs the optional hook and reports blocks.
#[derive(Debug, Clone)]
pub(crate) struct GuardrailsGate {
    hook: Option<Arc<dyn GuardrailsHook>>,
    security: Arc<dyn SecurityEventSink>,
}

impl GuardrailsGate {
    pub(crate) fn new(
        hook: Option<Arc<dyn GuardrailsHook>>,
        security: Arc<dyn SecurityEventSink>,
    ) -> Self {
        Self { hook, security }
    }

    /// Check `content`; without a hook everything is allowed.
    pub(crate) async fn enforce(
        &self,
        ctx: &RequestContext,
        stage: GuardrailStage,
        content: &str,
    ) -> Result<(), AppError> {
        let Some(hook) = &self.hook else {
            return Ok(());
        };

        let decision = hook
            .check(ctx, stage, content)
            .await
            .map_err(|e| AppError::from_collaborator(ctx, e))?;

        match decision {
            GuardrailDecision::Allow => Ok(()),
            GuardrailDecision::Block { reason } => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    stage = stage.as_str(),
                    reason = %reason,
                    "guardrail blocked content"
                );
                self.security.emit(SecurityEvent::GuardrailBlocked {
                    request_id: ctx.request_id.clone(),
                    payload: GuardrailBlockedPayload {
                        stage,
                        reason: reason.clone(),
                        content_length: content.chars().count(),
                    },
                });
                Err(AppError::new(
                    ctx,
                    ErrorCode::GuardrailBlocked,
                    format!("Guardrail blocked {} content: {}", stage.as_str(), reason),
                )
                .with_retryable(false)
                .with_details(json!({ "stage": stage, "reason": reason })))
            }
        }
    }
}
