//! JSON output strategies.
//!
//! Providers differ in how they can be asked for JSON:
//! - `JsonSchemaStrategy`: the provider enforces a JSON Schema (OpenAI)
//! - `JsonModeStrategy`: the provider only has a JSON object mode; the schema
//!   is injected into the prompt (DeepSeek and most OpenAI-compatible hosts)
//!
//! The reply text is parsed with [`parse_json_output`] either way.

use crate::error::AppError;
use crate::types::{ObjectInput, RequestContext, ResponseFormat, TextInput};

/// Strategy for turning an object request into a text request.
pub trait JsonOutputStrategy: Send + Sync + std::fmt::Debug {
    /// Get the strategy name for debugging
    fn name(&self) -> &str;

    /// Build the text request that asks for JSON matching `input.schema`.
    fn apply(&self, input: &ObjectInput) -> Result<TextInput, serde_json::Error>;
}

fn base_text_input(input: &ObjectInput) -> TextInput {
    TextInput {
        prompt: input.prompt.clone(),
        system_prompt: input.system_prompt.clone(),
        temperature: input.temperature,
        max_tokens: input.max_tokens,
        hint: input.hint.clone(),
        response_format: None,
    }
}

/// JSON Schema strategy for providers that support strict JSON Schema.
#[derive(Debug, Clone)]
pub struct JsonSchemaStrategy {
    /// Whether to enable strict mode
    pub strict: bool,
}

impl JsonSchemaStrategy {
    /// Create a new JSON Schema strategy with strict mode enabled
    pub fn new() -> Self {
        Self { strict: true }
    }

    /// Create a new JSON Schema strategy with configurable strict mode
    pub fn with_strict(strict: bool) -> Self {
        Self { strict }
    }
}

impl Default for JsonSchemaStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonOutputStrategy for JsonSchemaStrategy {
    fn name(&self) -> &str {
        "JsonSchemaStrategy"
    }

    fn apply(&self, input: &ObjectInput) -> Result<TextInput, serde_json::Error> {
        let mut text = base_text_input(input);
        text.response_format = Some(ResponseFormat::JsonSchema {
            name: "response".to_string(),
            schema: input.schema.clone(),
            strict: self.strict,
        });
        Ok(text)
    }
}

/// JSON Mode strategy for providers that only support basic JSON object mode.
///
/// Sets the JSON object response format and injects the schema into the
/// system prompt (or the user prompt) to guide the model.
#[derive(Debug, Clone)]
pub struct JsonModeStrategy {
    /// Whether to inject the schema into the system prompt (true) or append it to the prompt (false)
    pub use_system_message: bool,
}

impl JsonModeStrategy {
    /// Create a new JSON Mode strategy that uses the system prompt
    pub fn new() -> Self {
        Self {
            use_system_message: true,
        }
    }

    /// Create a new JSON Mode strategy with configurable injection point
    pub fn with_system_message(use_system_message: bool) -> Self {
        Self { use_system_message }
    }

    /// Build a JSON instruction from a schema
    fn build_json_instruction(schema: &serde_json::Value) -> Result<String, serde_json::Error> {
        let schema_str = serde_json::to_string_pretty(schema)?;
        Ok(format!(
            "You must respond with valid JSON that matches this schema:\n```json\n{}\n```\n\nIMPORTANT:\n\
            1. Only return the JSON object, nothing else\n\
            2. Ensure all required fields are present\n\
            3. Follow the schema structure exactly\n\
            4. Use the correct data types for each field",
            schema_str
        ))
    }
}

impl Default for JsonModeStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonOutputStrategy for JsonModeStrategy {
    fn name(&self) -> &str {
        "JsonModeStrategy"
    }

    fn apply(&self, input: &ObjectInput) -> Result<TextInput, serde_json::Error> {
        let instruction = Self::build_json_instruction(&input.schema)?;
        let mut text = base_text_input(input);
        text.response_format = Some(ResponseFormat::JsonObject);

        if self.use_system_message {
            text.system_prompt = Some(match text.system_prompt.take() {
                Some(system) => format!("{}\n\n{}", system, instruction),
                None => instruction,
            });
        } else {
            text.prompt = format!("{}\n\n{}", text.prompt, instruction);
        }

        Ok(text)
    }
}

/// Parse a model reply as JSON, tolerating surrounding prose and code fences.
pub fn parse_json_output(ctx: &RequestContext, text: &str) -> Result<serde_json::Value, AppError> {
    try_parse_json_output(text).ok_or_else(|| {
        AppError::contract_violation(ctx, "Model output is not valid JSON").with_details(
            serde_json::json!({ "outputPreview": text.chars().take(200).collect::<String>() }),
        )
    })
}

/// Like [`parse_json_output`] without the error envelope.
pub fn try_parse_json_output(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let unfenced = strip_code_fence(trimmed);
    if let Ok(value) = serde_json::from_str(unfenced) {
        return Some(value);
    }

    let start = unfenced.find(|c| c == '{' || c == '[')?;
    let end = unfenced.rfind(|c| c == '}' || c == ']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&unfenced[start..=end]).ok()
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"}
            }
        })
    }

    #[test]
    fn test_json_schema_strategy() {
        let strategy = JsonSchemaStrategy::new();
        let input = ObjectInput::new("Who?", schema());
        let text = strategy.apply(&input).unwrap();

        match text.response_format {
            Some(ResponseFormat::JsonSchema { schema: s, strict, .. }) => {
                assert_eq!(s, schema());
                assert!(strict);
            }
            _ => panic!("Expected JsonSchema response format"),
        }
        assert_eq!(text.prompt, "Who?");
    }

    #[test]
    fn test_json_mode_strategy() {
        let strategy = JsonModeStrategy::new();
        let input = ObjectInput::new("Who?", schema()).with_system_prompt("Be terse.");
        let text = strategy.apply(&input).unwrap();

        assert!(matches!(text.response_format, Some(ResponseFormat::JsonObject)));
        let system = text.system_prompt.unwrap();
        assert!(system.starts_with("Be terse.\n\n"));
        assert!(system.contains("\"name\""));
        assert_eq!(text.prompt, "Who?");
    }

    #[test]
    fn test_json_mode_in_prompt() {
        let strategy = JsonModeStrategy::with_system_message(false);
        let text = strategy.apply(&ObjectInput::new("Who?", schema())).unwrap();
        assert!(text.system_prompt.is_none());
        assert!(text.prompt.starts_with("Who?\n\nYou must respond with valid JSON"));
    }

    #[test]
    fn test_parse_json_output() {
        assert_eq!(
            try_parse_json_output("{\"a\": 1}"),
            Some(serde_json::json!({"a": 1}))
        );
        assert_eq!(
            try_parse_json_output("```json\n{\"a\": 2}\n```"),
            Some(serde_json::json!({"a": 2}))
        );
        assert_eq!(
            try_parse_json_output("Sure! Here it is: {\"a\": 3} Hope that helps."),
            Some(serde_json::json!({"a": 3}))
        );
        assert_eq!(try_parse_json_output("{\"a\": "), None);

        let ctx = RequestContext::new("tenant");
        let err = parse_json_output(&ctx, "not json").unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ContractViolation);
    }
}
