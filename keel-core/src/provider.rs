//! Provider adapter trait.
//!
//! An adapter is a concrete integration with one language-model backend.
//! Adapters only expose the minimal generate/stream surface; routing,
//! retries and fallback are handled by the
//! [`ResilientModel`](crate::runtime::ResilientModel).

use crate::error::AiError;
use crate::types::{RequestContext, ResponseFormat, Usage};
use async_trait::async_trait;
use futures::Stream;
use std::fmt::Debug;
use std::pin::Pin;

/// Stream type alias for provider stream parts
pub type ProviderStream = Pin<Box<dyn Stream<Item = Result<ProviderStreamPart, AiError>> + Send>>;

/// Input for a single adapter call
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCallInput {
    pub model_id: String,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub response_format: Option<ResponseFormat>,
}

impl ProviderCallInput {
    pub fn new(model_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            prompt: prompt.into(),
            system_prompt: None,
            temperature: None,
            max_tokens: None,
            response_format: None,
        }
    }
}

/// Result of a non-streaming adapter call
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderTextOutput {
    pub text: String,
    pub usage: Option<Usage>,
}

impl ProviderTextOutput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
        }
    }
}

/// One element of an adapter stream
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderStreamPart {
    Text(String),
    Done { usage: Option<Usage> },
}

/// Core provider trait for AI services.
///
/// Ids must be unique among the adapters registered with one executor.
/// When a call observes `ctx.cancellation()` firing mid-flight, the adapter
/// is responsible for aborting its own I/O and returning
/// [`AiError::Cancelled`].
#[async_trait]
pub trait ProviderAdapter: Send + Sync + Debug + 'static {
    /// Unique provider id
    fn id(&self) -> &str;

    /// Generate text (non-streaming)
    async fn generate_text(
        &self,
        ctx: &RequestContext,
        input: ProviderCallInput,
    ) -> Result<ProviderTextOutput, AiError>;

    /// Whether [`stream_text`](Self::stream_text) is implemented
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Stream text
    async fn stream_text(
        &self,
        _ctx: &RequestContext,
        _input: ProviderCallInput,
    ) -> Result<ProviderStream, AiError> {
        Err(AiError::unsupported(format!(
            "provider '{}' does not support streaming",
            self.id()
        )))
    }
}
