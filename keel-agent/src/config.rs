//! Runtime configuration for one orchestrated step.
//!
//! Assembled externally (typically from a stored template) and handed to
//! [`AgentProxy::run`](crate::AgentProxy::run).

use keel_core::error::AppError;
use keel_core::types::RequestContext;
use serde::{Deserialize, Serialize};

/// How citations in structured output are treated
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CitationMode {
    /// Citations are verified when present
    #[default]
    Off,
    /// Same as `Off`: citations are verified when present
    Optional,
    /// The output must carry a non-empty, verified citation list
    Required,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CitationPolicy {
    #[serde(default)]
    pub mode: CitationMode,
}

/// Carried from the template; only single-step execution exists.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    pub task_id: String,
    pub step_id: String,
    pub step_name: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// JSON Schema of the structured output; plain text when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    #[serde(default)]
    pub citation_policy: CitationPolicy,
    #[serde(default)]
    pub workflow_policy: WorkflowPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub structured_max_retries: u32,
}

impl RuntimeConfig {
    pub fn new(
        task_id: impl Into<String>,
        step_id: impl Into<String>,
        step_name: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            step_id: step_id.into(),
            step_name: step_name.into(),
            prompt: prompt.into(),
            system_prompt: None,
            output_schema: None,
            citation_policy: CitationPolicy::default(),
            workflow_policy: WorkflowPolicy::default(),
            temperature: None,
            max_tokens: None,
            structured_max_retries: 0,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_output_schema(mut self, schema: serde_json::Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_citation_mode(mut self, mode: CitationMode) -> Self {
        self.citation_policy.mode = mode;
        self
    }

    pub fn with_structured_max_retries(mut self, max_retries: u32) -> Self {
        self.structured_max_retries = max_retries;
        self
    }

    /// System prompt and prompt as the input guardrail sees them
    pub fn full_prompt(&self) -> String {
        match &self.system_prompt {
            Some(system) => format!("{}\n\n{}", system, self.prompt),
            None => self.prompt.clone(),
        }
    }

    pub fn citation_mode(&self) -> CitationMode {
        self.citation_policy.mode
    }

    /// Reject configs that cannot produce well-formed step events
    pub fn validate(&self, ctx: &RequestContext) -> Result<(), AppError> {
        let missing: Vec<&str> = [
            ("taskId", self.task_id.as_str()),
            ("stepId", self.step_id.as_str()),
            ("prompt", self.prompt.as_str()),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(AppError::validation(
                ctx,
                format!("Runtime config is missing {}", missing.join(", ")),
            )
            .with_details(serde_json::json!({ "fields": missing })))
        }
    }
}
