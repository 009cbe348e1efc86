//! # Keel Providers
//!
//! Provider adapter implementations for various AI services.

pub mod openai;

// Re-exports
pub use openai::{OpenAiAdapter, OpenAiBuilder};

use keel_core::error::AiError;

/// Create a DeepSeek adapter (OpenAI-compatible)
///
/// DeepSeek uses the OpenAI API protocol but with a different endpoint.
/// This is a convenience function that creates an OpenAI adapter configured
/// for DeepSeek's API endpoint, registered under the `deepseek` id.
///
/// # Example
///
/// ```ignore
/// use keel_provider::deepseek;
///
/// let adapter = deepseek("your-api-key")?;
/// ```
pub fn deepseek(api_key: impl Into<String>) -> Result<OpenAiAdapter, AiError> {
    OpenAiAdapter::builder()
        .api_key(api_key)
        .api_base("https://api.deepseek.com/v1")
        .build_with_id("deepseek", "DeepSeek")
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::provider::ProviderAdapter;

    #[test]
    fn test_deepseek_id() {
        let adapter = deepseek("sk-test").unwrap();
        assert_eq!(adapter.id(), "deepseek");
        assert_eq!(adapter.name(), "DeepSeek");
    }
}
