//! Error types for Keel operations.
//!
//! Two layers of errors exist:
//! - [`AiError`] is what leaf provider adapters return. It is the "native"
//!   error of an integration (network, serialization, rate limit...).
//! - [`AppError`] is the canonical envelope every internal boundary returns.
//!   It always carries the request id of the call that produced it.

use crate::types::RequestContext;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Error code taxonomy.
///
/// The known members are listed as variants; any other code round-trips
/// through [`ErrorCode::Other`], so callers may extend the taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Malformed input
    ValidationError,
    /// Identity or ownership violation
    AuthError,
    /// Provider rate limit
    RateLimited,
    /// Provider did not answer in time
    UpstreamTimeout,
    /// Provider failed or is unreachable
    UpstreamUnavailable,
    /// A schema or invariant was violated by model output or caller data
    ContractViolation,
    /// Content policy decision
    GuardrailBlocked,
    /// Request aborted
    Cancelled,
    /// Caller-defined code
    Other(String),
}

impl ErrorCode {
    /// Wire representation of the code.
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::AuthError => "AUTH_ERROR",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            ErrorCode::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            ErrorCode::ContractViolation => "CONTRACT_VIOLATION",
            ErrorCode::GuardrailBlocked => "GUARDRAIL_BLOCKED",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::Other(code) => code,
        }
    }

    /// Whether errors with this code are retryable unless stated otherwise.
    pub fn default_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::RateLimited
                | ErrorCode::UpstreamTimeout
                | ErrorCode::UpstreamUnavailable
                | ErrorCode::Cancelled
        )
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        match code {
            "VALIDATION_ERROR" => ErrorCode::ValidationError,
            "AUTH_ERROR" => ErrorCode::AuthError,
            "RATE_LIMITED" => ErrorCode::RateLimited,
            "UPSTREAM_TIMEOUT" => ErrorCode::UpstreamTimeout,
            "UPSTREAM_UNAVAILABLE" => ErrorCode::UpstreamUnavailable,
            "CONTRACT_VIOLATION" => ErrorCode::ContractViolation,
            "GUARDRAIL_BLOCKED" => ErrorCode::GuardrailBlocked,
            "CANCELLED" => ErrorCode::Cancelled,
            other => ErrorCode::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(ErrorCode::from(code.as_str()))
    }
}

/// The canonical failure envelope.
///
/// Every component returns this instead of leaking adapter-specific error
/// types upward. The `message` always ends with the request id, appended
/// exactly once.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{code}: {message}")]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AppError {
    /// Create an error for the given request, with the code's default retryability.
    pub fn new(ctx: &RequestContext, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::for_request(&ctx.request_id, code, message)
    }

    /// Create an error when only the request id is at hand.
    pub fn for_request(request_id: &str, code: ErrorCode, message: impl Into<String>) -> Self {
        let retryable = code.default_retryable();
        Self {
            code,
            message: stamp_request_id(message.into(), request_id),
            retryable,
            request_id: request_id.to_string(),
            details: None,
        }
    }

    /// Create a validation error
    pub fn validation(ctx: &RequestContext, message: impl Into<String>) -> Self {
        Self::new(ctx, ErrorCode::ValidationError, message)
    }

    /// Create a contract violation error
    pub fn contract_violation(ctx: &RequestContext, message: impl Into<String>) -> Self {
        Self::new(ctx, ErrorCode::ContractViolation, message)
    }

    /// Create an upstream unavailable error
    pub fn upstream_unavailable(ctx: &RequestContext, message: impl Into<String>) -> Self {
        Self::new(ctx, ErrorCode::UpstreamUnavailable, message)
    }

    /// Create a cancellation error
    pub fn cancelled(ctx: &RequestContext) -> Self {
        Self::new(ctx, ErrorCode::Cancelled, "Request was cancelled")
    }

    /// Create an error for a capability the model does not offer
    pub fn unsupported(ctx: &RequestContext, operation: &str) -> Self {
        Self::new(
            ctx,
            ErrorCode::ValidationError,
            format!("Operation '{}' is not supported by this model", operation),
        )
    }

    /// Attach structured details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Override retryability
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Re-stamp the error with the request id of `ctx`.
    ///
    /// Used when an error crosses into a different request's processing
    /// (for example an error value produced by a collaborator).
    pub fn for_context(mut self, ctx: &RequestContext) -> Self {
        if self.request_id != ctx.request_id {
            self.request_id = ctx.request_id.clone();
        }
        self.message = stamp_request_id(self.message, &self.request_id);
        self
    }

    /// Normalize an adapter error into the canonical envelope.
    pub fn from_adapter(ctx: &RequestContext, err: AiError) -> Self {
        let code = match &err {
            AiError::App(app) => return app.clone().for_context(ctx),
            AiError::RateLimit(_) => ErrorCode::RateLimited,
            AiError::Timeout(_) => ErrorCode::UpstreamTimeout,
            AiError::Authentication(_) => ErrorCode::AuthError,
            AiError::InvalidRequest(_) => ErrorCode::ValidationError,
            AiError::Cancelled => ErrorCode::Cancelled,
            _ => ErrorCode::UpstreamUnavailable,
        };
        Self::new(ctx, code, err.to_string())
    }

    /// Normalize an error returned by a collaborator (evidence store, guardrail hook).
    ///
    /// An `AppError` carried inside the `anyhow::Error` is kept as-is.
    pub fn from_collaborator(ctx: &RequestContext, err: anyhow::Error) -> Self {
        match err.downcast::<AppError>() {
            Ok(app) => app.for_context(ctx),
            Err(err) => match err.downcast::<AiError>() {
                Ok(ai) => Self::from_adapter(ctx, ai),
                Err(err) => Self::upstream_unavailable(ctx, format!("{:#}", err)),
            },
        }
    }

    /// Check if this error may be retried
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

fn stamp_request_id(message: String, request_id: &str) -> String {
    if request_id.is_empty() {
        return message;
    }
    let tag = format!("(requestId={})", request_id);
    if message.contains(&tag) {
        message
    } else {
        format!("{} {}", message, tag)
    }
}

/// Errors raised by provider adapters and by construction-time configuration.
#[derive(Debug, thiserror::Error)]
pub enum AiError {
    /// Provider-specific errors
    #[error("Provider error: {0}")]
    Provider(String),

    /// Transport-level failure reaching the provider
    #[error("Network error: {0}")]
    Network(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication errors
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Rate limit errors
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// Invalid request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Model not found errors
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Timeout errors
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// The adapter observed cancellation and aborted its own I/O
    #[error("Request cancelled")]
    Cancelled,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Stream errors
    #[error("Stream error: {0}")]
    Stream(String),

    /// Unsupported operation errors
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// An adapter that already speaks the canonical envelope
    #[error(transparent)]
    App(AppError),

    /// Generic errors
    #[error("Error: {0}")]
    Other(String),
}

impl AiError {
    /// Create a provider error
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create an authentication error
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limit(msg: impl Into<String>) -> Self {
        Self::RateLimit(msg.into())
    }

    /// Create an invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a stream error
    pub fn stream(msg: impl Into<String>) -> Self {
        Self::Stream(msg.into())
    }

    /// Create an unsupported operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

impl From<AppError> for AiError {
    fn from(err: AppError) -> Self {
        Self::App(err)
    }
}

impl From<String> for AiError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

impl From<&str> for AiError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_appended_once() {
        let ctx = RequestContext::new("tenant").with_request_id("req-42");
        let err = AppError::validation(&ctx, "bad input");
        assert_eq!(err.message, "bad input (requestId=req-42)");

        let again = err.clone().for_context(&ctx);
        assert_eq!(again.message, err.message);

        let stamped = AppError::validation(&ctx, "upstream said no (requestId=req-42)");
        assert_eq!(stamped.message, "upstream said no (requestId=req-42)");
    }

    #[test]
    fn test_short_request_id_inside_message_still_stamped() {
        let err = AppError::for_request("1", ErrorCode::UpstreamUnavailable, "failed after 1 attempts");
        assert_eq!(err.message, "failed after 1 attempts (requestId=1)");

        let ctx = RequestContext::new("tenant").with_request_id("1");
        assert_eq!(err.clone().for_context(&ctx).message, err.message);
    }

    #[test]
    fn test_from_adapter_mapping() {
        let ctx = RequestContext::new("tenant").with_request_id("req-1");

        let err = AppError::from_adapter(&ctx, AiError::rate_limit("slow down"));
        assert_eq!(err.code, ErrorCode::RateLimited);
        assert!(err.retryable);

        let err = AppError::from_adapter(&ctx, AiError::authentication("nope"));
        assert_eq!(err.code, ErrorCode::AuthError);
        assert!(!err.retryable);

        let err = AppError::from_adapter(&ctx, AiError::provider("boom"));
        assert_eq!(err.code, ErrorCode::UpstreamUnavailable);
        assert!(err.retryable);
        assert_eq!(err.request_id, "req-1");

        let err = AppError::from_adapter(&ctx, AiError::network("connection reset"));
        assert_eq!(err.code, ErrorCode::UpstreamUnavailable);
        assert!(err.retryable);
        assert!(err.message.starts_with("Network error: connection reset"));
    }

    #[test]
    fn test_embedded_app_error_keeps_code() {
        let ctx = RequestContext::new("tenant").with_request_id("req-7");
        let inner = AppError::for_request("other", ErrorCode::ContractViolation, "bad shape");
        let err = AppError::from_adapter(&ctx, AiError::App(inner));
        assert_eq!(err.code, ErrorCode::ContractViolation);
        assert_eq!(err.request_id, "req-7");
        assert!(err.message.contains("requestId=req-7"));
    }

    #[test]
    fn test_collaborator_error_downcast() {
        let ctx = RequestContext::new("tenant").with_request_id("req-9");
        let app = AppError::new(&ctx, ErrorCode::AuthError, "forbidden");
        let err = AppError::from_collaborator(&ctx, anyhow::Error::new(app.clone()));
        assert_eq!(err, app);

        let err = AppError::from_collaborator(&ctx, anyhow::anyhow!("disk on fire"));
        assert_eq!(err.code, ErrorCode::UpstreamUnavailable);
    }

    #[test]
    fn test_code_is_open_string() {
        let code: ErrorCode = serde_json::from_str("\"QUOTA_EXCEEDED\"").unwrap();
        assert_eq!(code, ErrorCode::Other("QUOTA_EXCEEDED".to_string()));
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"QUOTA_EXCEEDED\"");

        let code: ErrorCode = serde_json::from_str("\"GUARDRAIL_BLOCKED\"").unwrap();
        assert_eq!(code, ErrorCode::GuardrailBlocked);
        assert!(!code.default_retryable());
    }
}
