//! Core types shared across Keel components.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;

fn non_empty_request_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let request_id = String::deserialize(deserializer)?;
    if request_id.trim().is_empty() {
        return Err(serde::de::Error::custom("requestId must be non-empty"));
    }
    Ok(request_id)
}

/// Per-call context.
///
/// Created once per inbound call and threaded by value through every
/// component. The cancellation token travels with it but is not serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    #[serde(deserialize_with = "non_empty_request_id")]
    pub request_id: String,
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip)]
    cancellation: CancellationToken,
}

impl RequestContext {
    /// Create a new request context with a generated request id
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            project_id: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Create a context from caller-supplied identifiers.
    ///
    /// The request id must be non-empty, since it is stamped into every error.
    pub fn try_new(
        request_id: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Result<Self, AppError> {
        let request_id = request_id.into();
        if request_id.trim().is_empty() {
            return Err(AppError::for_request(
                "",
                crate::error::ErrorCode::ValidationError,
                "requestId must be non-empty",
            ));
        }
        Ok(Self::new(tenant_id).with_request_id(request_id))
    }

    /// Set the request id.
    ///
    /// Not validated; use [`try_new`](Self::try_new) for caller-supplied ids.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Scope the request to a project
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Attach a cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// The cancellation token for this request
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Whether the request has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Message role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Usage statistics
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A `(providerId, modelId)` pair the executor may attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRoute {
    pub provider_id: String,
    pub model_id: String,
}

impl ProviderRoute {
    /// Create a new route
    pub fn new(provider_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
        }
    }
}

impl fmt::Display for ProviderRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider_id, self.model_id)
    }
}

/// Coarse complexity of a call, used by routing hints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    High,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Low => "low",
            Complexity::High => "high",
        }
    }
}

/// Cost budget of a call, used by routing hints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Budget {
    Low,
    High,
}

impl Budget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Budget::Low => "low",
            Budget::High => "high",
        }
    }
}

/// Caller-supplied routing hint
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RouteHint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<Complexity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<Budget>,
}

/// Response format requested from the provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Plain text response
    Text,
    /// JSON object response (basic JSON mode, no schema validation)
    JsonObject,
    /// JSON Schema response (with strict schema validation)
    JsonSchema {
        name: String,
        schema: serde_json::Value,
        strict: bool,
    },
}

/// Text generation input for a [`LanguageModel`](crate::model::LanguageModel)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TextInput {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<RouteHint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

impl TextInput {
    /// Create a new text input with a prompt
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Set system prompt
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set routing hint
    pub fn with_hint(mut self, hint: RouteHint) -> Self {
        self.hint = Some(hint);
        self
    }
}

/// Text generation result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TextOutput {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl TextOutput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
        }
    }
}

/// Object generation input
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInput {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// JSON Schema the object must satisfy
    pub schema: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<RouteHint>,
}

impl ObjectInput {
    pub fn new(prompt: impl Into<String>, schema: serde_json::Value) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            schema,
            temperature: None,
            max_tokens: None,
            hint: None,
        }
    }

    /// Set system prompt
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }
}

/// Object generation result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectOutput {
    pub object: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// One element of a text stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamPart {
    /// A token (or group of tokens)
    TextDelta { text: String },
    /// Terminal marker
    Done,
}

impl StreamPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }
}

/// A single flattened validation issue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
    pub code: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            code: code.into(),
        }
    }
}

/// Verification status of a citation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CitationStatus {
    Verifiable,
    Unavailable,
    Degraded,
}

/// Where in the source a citation points
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Locator {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_start: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_end: Option<u64>,
}

/// A claim-to-source pointer produced by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub citation_id: String,
    pub source_type: String,
    pub project_id: String,
    pub locator: Locator,
    pub status: CitationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
}

/// The verified source record backing a citation. Same shape as [`Citation`].
pub type Evidence = Citation;

impl Citation {
    /// Check the citation's invariants, reporting issues under `path`.
    pub fn issues(&self, path: &str) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let at = |field: &str| format!("{}.{}", path, field);

        if self.citation_id.trim().is_empty() {
            issues.push(ValidationIssue::new(at("citationId"), "citationId must be non-empty", "too_small"));
        }
        if self.project_id.trim().is_empty() {
            issues.push(ValidationIssue::new(at("projectId"), "projectId must be non-empty", "too_small"));
        }

        match self.status {
            CitationStatus::Degraded if self.degraded_reason.is_none() => {
                issues.push(ValidationIssue::new(
                    at("degradedReason"),
                    "degradedReason is required when status is degraded",
                    "custom",
                ));
            }
            CitationStatus::Verifiable => {
                if self.degraded_reason.is_some() {
                    issues.push(ValidationIssue::new(
                        at("degradedReason"),
                        "degradedReason is not allowed when status is verifiable",
                        "custom",
                    ));
                }
                if self.locator.page.is_none() && self.locator.offset_start.is_none() {
                    issues.push(ValidationIssue::new(
                        at("locator"),
                        "verifiable citations require locator.page or locator.offsetStart",
                        "custom",
                    ));
                }
            }
            _ => {}
        }

        if let (Some(start), Some(end)) = (self.locator.offset_start, self.locator.offset_end) {
            if end < start {
                issues.push(ValidationIssue::new(
                    at("locator.offsetEnd"),
                    "offsetEnd must be greater than or equal to offsetStart",
                    "custom",
                ));
            }
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn citation(status: CitationStatus) -> Citation {
        Citation {
            citation_id: "c1".to_string(),
            source_type: "document".to_string(),
            project_id: "p1".to_string(),
            locator: Locator {
                page: Some(3),
                ..Default::default()
            },
            status,
            snippet: None,
            degraded_reason: None,
        }
    }

    #[test]
    fn test_citation_invariants() {
        assert!(citation(CitationStatus::Verifiable).issues("[0]").is_empty());

        let degraded = citation(CitationStatus::Degraded);
        let issues = degraded.issues("[0]");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "[0].degradedReason");

        let mut verifiable = citation(CitationStatus::Verifiable);
        verifiable.locator = Locator {
            page: None,
            offset_start: Some(10),
            offset_end: Some(4),
        };
        let issues = verifiable.issues("[1]");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "[1].locator.offsetEnd");

        verifiable.locator = Locator::default();
        assert_eq!(verifiable.issues("[1]")[0].path, "[1].locator");
    }

    #[test]
    fn test_citation_wire_format() {
        let json = serde_json::json!({
            "citationId": "c9",
            "sourceType": "web",
            "projectId": "p2",
            "locator": {"offsetStart": 1, "offsetEnd": 5},
            "status": "degraded",
            "degradedReason": "source moved"
        });
        let parsed: Citation = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.status, CitationStatus::Degraded);
        assert_eq!(parsed.locator.offset_end, Some(5));
        assert!(parsed.issues("").is_empty());
    }

    #[test]
    fn test_context_requires_request_id() {
        assert!(RequestContext::try_new("  ", "tenant").is_err());
        let ctx = RequestContext::try_new("req-1", "tenant").unwrap();
        assert_eq!(ctx.request_id, "req-1");
        assert!(!ctx.is_cancelled());
        ctx.cancellation().cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_deserialized_context_requires_request_id() {
        let empty = serde_json::json!({"requestId": " ", "tenantId": "tenant"});
        assert!(serde_json::from_value::<RequestContext>(empty).is_err());

        let ok = serde_json::json!({"requestId": "req-9", "tenantId": "tenant", "projectId": "p1"});
        let ctx: RequestContext = serde_json::from_value(ok).unwrap();
        assert_eq!(ctx.request_id, "req-9");
        assert_eq!(ctx.project_id.as_deref(), Some("p1"));
    }
}
