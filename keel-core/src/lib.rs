//! # Keel Core
//!
//! Core abstractions and runtime for resilient LLM execution.
//!
//! This crate provides the foundational traits and types for routing calls
//! across multiple providers, surviving provider failures, composing
//! middleware around a model, validating structured output and deriving
//! response cache keys.

pub mod cache_key;
pub mod canonical;
pub mod error;
pub mod event;
pub mod middleware;
pub mod model;
pub mod provider;
pub mod routing;
pub mod runtime;
pub mod structured;
pub mod types;

// Re-exports
pub use cache_key::{compute_response_cache_key, template_definition_hash, ResponseCacheKeyInput};
pub use error::{AiError, AppError, ErrorCode};
pub use event::{GuardrailStage, SecurityEvent, StepEvent, StepEventKind};
pub use middleware::{wrap_language_model, Middleware, ModelBuilder};
pub use model::{LanguageModel, ModelCapabilities, ObjectStream, TextStream};
pub use provider::{ProviderAdapter, ProviderCallInput, ProviderStream, ProviderStreamPart, ProviderTextOutput};
pub use routing::{decide_provider_route, ProviderRoutingConfig, RouteDecision, RouteInput};
pub use runtime::{ProviderMetricsSink, ResilientModel};
pub use structured::{generate_object_with_retries, stream_object_with_retries, StructuredOptions};
pub use types::*;

/// Result type alias for Keel operations
pub type Result<T> = std::result::Result<T, AppError>;
