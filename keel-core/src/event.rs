//! Events produced for the transport layer.
//!
//! The core has no knowledge of wire framing; a transport serializes these
//! however it likes. Field names follow the camelCase wire convention.

use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Guardrail checkpoint
#[derive(Debug, Clone, Copy, Serialize, serde::Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailStage {
    Input,
    ToolCall,
    Output,
}

impl GuardrailStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardrailStage::Input => "input",
            GuardrailStage::ToolCall => "tool_call",
            GuardrailStage::Output => "output",
        }
    }
}

/// Structured lifecycle notification emitted during one orchestrated request.
///
/// Exactly one `step_started`, any number of progress/tool events, then
/// exactly one of `step_completed` or `step_failed`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepEvent {
    pub task_id: String,
    pub step_id: String,
    pub step_name: String,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    #[serde(flatten)]
    pub kind: StepEventKind,
}

/// Variant-specific part of a [`StepEvent`]
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum StepEventKind {
    #[serde(rename_all = "camelCase")]
    StepStarted { prompt_chars: usize },
    #[serde(rename_all = "camelCase")]
    StepProgress { phase: String },
    #[serde(rename_all = "camelCase")]
    ToolCalled {
        tool_name: String,
        arguments: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_name: String,
        result: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    StepCompleted { output_summary: String },
    StepFailed { error: AppError },
}

impl StepEventKind {
    /// The `type` tag of this variant
    pub fn type_name(&self) -> &'static str {
        match self {
            StepEventKind::StepStarted { .. } => "step_started",
            StepEventKind::StepProgress { .. } => "step_progress",
            StepEventKind::ToolCalled { .. } => "tool_called",
            StepEventKind::ToolResult { .. } => "tool_result",
            StepEventKind::StepCompleted { .. } => "step_completed",
            StepEventKind::StepFailed { .. } => "step_failed",
        }
    }

    /// Whether this variant ends the step lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepEventKind::StepCompleted { .. } | StepEventKind::StepFailed { .. }
        )
    }
}

/// Security-relevant event; only emitted when a guardrail blocks.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecurityEvent {
    #[serde(rename_all = "camelCase")]
    GuardrailBlocked {
        request_id: String,
        payload: GuardrailBlockedPayload,
    },
}

impl SecurityEvent {
    pub fn request_id(&self) -> &str {
        match self {
            SecurityEvent::GuardrailBlocked { request_id, .. } => request_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailBlockedPayload {
    pub stage: GuardrailStage,
    pub reason: String,
    pub content_length: usize,
}
