//! # Keel
//!
//! Resilient LLM execution for multi-tenant services.
//!
//! Keel routes every call to a primary `(provider, model)` pair, retries and
//! falls back across candidates when a provider fails, validates structured
//! output against a JSON Schema, and wraps a single agent step in guardrails
//! and citation verification.
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! keel = { version = "0.1", features = ["openai", "layers", "agent"] }
//! ```
//!
//! ```ignore
//! use keel::prelude::*;
//! use keel::provider::deepseek;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let routing = ProviderRoutingConfig::new(ProviderRoute::new("deepseek", "deepseek-chat"))
//!     .with_fallback(ProviderRoute::new("openai", "gpt-4o-mini"));
//!
//! let model = ResilientModel::builder(routing)
//!     .adapter(deepseek("sk-...")?)
//!     .adapter(OpenAiAdapter::new("sk-..."))
//!     .build()?;
//!
//! let model = ModelBuilder::new(model)
//!     .middleware(LoggingMiddleware::new())
//!     .finish();
//!
//! let ctx = RequestContext::new("tenant-a");
//! let output = model.generate_text(&ctx, TextInput::new("What is Rust?")).await?;
//! println!("{}", output.text);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `default`: `openai`, `layers` and `agent`
//! - `openai`: OpenAI-compatible provider adapter
//! - `layers`: Built-in middlewares (logging, response cache)
//! - `agent`: Agent proxy with guardrails and citation verification
//! - `schema`: Re-export `schemars` to derive output schemas
//! - `full`: All features enabled

// Re-export core types and traits
pub use keel_core::*;

// Re-export providers under `provider` module
#[cfg(feature = "keel-provider")]
pub mod provider {
    //! Provider adapter implementations.
    pub use keel_provider::*;
}

// Re-export middlewares under `layer` module
#[cfg(feature = "keel-layer")]
pub mod layer {
    //! Built-in middlewares.
    pub use keel_layer::*;
}

// Re-export agent orchestration under `agent` module
#[cfg(feature = "keel-agent")]
pub mod agent {
    //! Single-step agent orchestration.
    pub use keel_agent::*;
}

// Re-export schemars when schema feature is enabled
#[cfg(feature = "schema")]
pub mod schemars {
    pub use ::schemars::*;
}

/// Prelude module for convenient imports
pub mod prelude {
    //! Prelude module containing the most commonly used types and traits.
    //!
    //! ```
    //! use keel::prelude::*;
    //! ```

    pub use crate::{
        AppError, ErrorCode, LanguageModel, ModelBuilder, ObjectInput, ProviderAdapter,
        ProviderRoute, ProviderRoutingConfig, RequestContext, ResilientModel, Result, TextInput,
        TextOutput,
    };
    pub use crate::routing::{FallbackPolicy, HeuristicConfig, RetryPolicy};

    #[cfg(feature = "keel-provider")]
    pub use crate::provider::*;

    #[cfg(feature = "keel-layer")]
    pub use crate::layer::*;

    #[cfg(feature = "keel-agent")]
    pub use crate::agent::{
        AgentOutput, AgentProxy, CitationMode, EventRecorder, EvidenceProvider, FnGuardrails,
        GuardrailDecision, GuardrailsHook, InMemoryEvidenceProvider, RuntimeConfig,
    };
}
