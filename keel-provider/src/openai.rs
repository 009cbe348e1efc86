//! OpenAI adapter implementation using async-openai crate.
//!
//! This adapter only implements the minimal `ProviderAdapter` surface:
//! one non-streaming and one streaming chat completion. Routing, retries and
//! fallback are handled by the `ResilientModel` in keel-core.

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionStreamOptions, CompletionUsage,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    ResponseFormat as OpenAIResponseFormat,
    ResponseFormatJsonSchema as OpenAIResponseFormatJsonSchema,
};
use async_openai::Client;
use async_trait::async_trait;
use futures::StreamExt;
use keel_core::error::AiError;
use keel_core::provider::{
    ProviderAdapter, ProviderCallInput, ProviderStream, ProviderStreamPart, ProviderTextOutput,
};
use keel_core::types::*;

/// OpenAI-compatible adapter using async-openai
#[derive(Clone)]
pub struct OpenAiAdapter {
    client: Client<OpenAIConfig>,
    id: String,
    name: String,
}

impl std::fmt::Debug for OpenAiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiAdapter")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl OpenAiAdapter {
    /// Create a new OpenAI adapter with default configuration
    pub fn new(api_key: impl Into<String>) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);

        Self {
            client: Client::with_config(config),
            id: "openai".to_string(),
            name: "OpenAI".to_string(),
        }
    }

    /// Create a builder for more configuration options
    pub fn builder() -> OpenAiBuilder {
        OpenAiBuilder::default()
    }

    /// Human readable provider name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn convert_response_format(format: &ResponseFormat) -> OpenAIResponseFormat {
        match format {
            ResponseFormat::Text => OpenAIResponseFormat::Text,
            ResponseFormat::JsonObject => OpenAIResponseFormat::JsonObject,
            ResponseFormat::JsonSchema {
                name,
                schema,
                strict,
            } => OpenAIResponseFormat::JsonSchema {
                json_schema: OpenAIResponseFormatJsonSchema {
                    name: name.clone(),
                    schema: Some(schema.clone()),
                    strict: Some(*strict),
                    description: None,
                },
            },
        }
    }

    fn build_messages(input: &ProviderCallInput) -> Result<Vec<ChatCompletionRequestMessage>, AiError> {
        let mut messages = Vec::with_capacity(2);

        if let Some(system) = &input.system_prompt {
            let msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(system.as_str())
                .build()
                .map_err(|e| AiError::provider(format!("Failed to build system message: {}", e)))?;
            messages.push(ChatCompletionRequestMessage::System(msg));
        }

        let msg = ChatCompletionRequestUserMessageArgs::default()
            .content(input.prompt.as_str())
            .build()
            .map_err(|e| AiError::provider(format!("Failed to build user message: {}", e)))?;
        messages.push(ChatCompletionRequestMessage::User(msg));

        Ok(messages)
    }

    /// Build CreateChatCompletionRequest from a call input
    #[allow(deprecated)]
    fn build_request(
        input: &ProviderCallInput,
        stream: bool,
    ) -> Result<CreateChatCompletionRequest, AiError> {
        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&input.model_id)
            .messages(Self::build_messages(input)?);

        if let Some(max_tokens) = input.max_tokens {
            builder.max_tokens(max_tokens);
        }
        if let Some(temperature) = input.temperature {
            builder.temperature(temperature);
        }
        if let Some(response_format) = &input.response_format {
            builder.response_format(Self::convert_response_format(response_format));
        }
        if stream {
            builder
                .stream(true)
                .stream_options(ChatCompletionStreamOptions {
                    include_usage: true,
                });
        }

        builder
            .build()
            .map_err(|e| AiError::invalid_request(format!("Failed to build request: {}", e)))
    }

    fn convert_usage(usage: CompletionUsage) -> Usage {
        Usage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

/// Classify an API error body into the adapter error taxonomy
fn classify_api_error(message: String, kind: Option<&str>, code: Option<&str>) -> AiError {
    let tags = [kind.unwrap_or_default(), code.unwrap_or_default()];
    let has = |needle: &str| tags.iter().any(|tag| tag.contains(needle));

    if has("rate_limit") || has("insufficient_quota") {
        AiError::rate_limit(message)
    } else if has("invalid_api_key") || has("authentication") || has("permission") {
        AiError::authentication(message)
    } else if has("model_not_found") {
        AiError::ModelNotFound(message)
    } else if has("invalid_request") || has("context_length") {
        AiError::invalid_request(message)
    } else {
        AiError::provider(format!("OpenAI API error: {}", message))
    }
}

fn map_openai_error(err: OpenAIError) -> AiError {
    match err {
        OpenAIError::ApiError(api) => {
            classify_api_error(api.message, api.r#type.as_deref(), api.code.as_deref())
        }
        OpenAIError::Reqwest(e) if e.is_timeout() => AiError::timeout(e.to_string()),
        OpenAIError::Reqwest(e) => AiError::network(e.to_string()),
        OpenAIError::JSONDeserialize(e) => AiError::Serialization(e),
        OpenAIError::InvalidArgument(msg) => AiError::invalid_request(msg),
        other => AiError::provider(format!("OpenAI API error: {}", other)),
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate_text(
        &self,
        ctx: &RequestContext,
        input: ProviderCallInput,
    ) -> Result<ProviderTextOutput, AiError> {
        let request = Self::build_request(&input, false)?;
        tracing::trace!(request_id = %ctx.request_id, provider_id = %self.id, model = %input.model_id, "chat completion");

        let chat = self.client.chat();
        let response = tokio::select! {
            response = chat.create(request) => response.map_err(map_openai_error)?,
            _ = ctx.cancellation().cancelled() => return Err(AiError::Cancelled),
        };

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        Ok(ProviderTextOutput {
            text,
            usage: response.usage.map(Self::convert_usage),
        })
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn stream_text(
        &self,
        ctx: &RequestContext,
        input: ProviderCallInput,
    ) -> Result<ProviderStream, AiError> {
        let request = Self::build_request(&input, true)?;

        let chat = self.client.chat();
        let mut chunks = tokio::select! {
            stream = chat.create_stream(request) => stream.map_err(map_openai_error)?,
            _ = ctx.cancellation().cancelled() => return Err(AiError::Cancelled),
        };

        let stream = async_stream::stream! {
            let mut usage = None;
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(response) => {
                        if let Some(u) = response.usage {
                            usage = Some(Self::convert_usage(u));
                        }
                        let text = response
                            .choices
                            .into_iter()
                            .filter_map(|choice| choice.delta.content)
                            .collect::<String>();
                        if !text.is_empty() {
                            yield Ok(ProviderStreamPart::Text(text));
                        }
                    }
                    Err(e) => {
                        yield Err(map_openai_error(e));
                        return;
                    }
                }
            }
            yield Ok(ProviderStreamPart::Done { usage });
        };

        Ok(Box::pin(stream))
    }
}

/// Builder for OpenAI adapter with custom configuration
#[derive(Default)]
pub struct OpenAiBuilder {
    api_key: Option<String>,
    api_base: Option<String>,
    org_id: Option<String>,
}

impl OpenAiBuilder {
    /// Set API key
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set API base URL (for OpenAI-compatible APIs like DeepSeek)
    pub fn api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    /// Set organization ID
    pub fn organization(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    /// Build the adapter with the `openai` id
    pub fn build(self) -> Result<OpenAiAdapter, AiError> {
        self.build_with_id("openai", "OpenAI")
    }

    /// Build an adapter with a custom provider ID and name
    ///
    /// This is useful for OpenAI-compatible APIs like DeepSeek that use
    /// the same protocol but different endpoints. The id must be unique
    /// among the adapters registered with one `ResilientModel`.
    pub fn build_with_id(
        self,
        provider_id: impl Into<String>,
        provider_name: impl Into<String>,
    ) -> Result<OpenAiAdapter, AiError> {
        let api_key = self
            .api_key
            .filter(|key| !key.is_empty())
            .ok_or_else(|| AiError::configuration("API key is required"))?;

        let mut config = OpenAIConfig::new().with_api_key(api_key);

        if let Some(api_base) = self.api_base {
            config = config.with_api_base(api_base);
        }

        if let Some(org_id) = self.org_id {
            config = config.with_org_id(org_id);
        }

        Ok(OpenAiAdapter {
            client: Client::with_config(config),
            id: provider_id.into(),
            name: provider_name.into(),
        })
    }
}
