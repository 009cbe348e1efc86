//! # Keel Agent
//!
//! Single-step agent orchestration on top of a Keel [`LanguageModel`]:
//! guardrail checks around generation, citation verification against an
//! evidence store, and structured step/security events for the transport.
//!
//! [`LanguageModel`]: keel_core::LanguageModel

pub mod citations;
pub mod config;
pub mod events;
pub mod evidence;
pub mod guardrails;
pub mod proxy;

// Re-exports
pub use citations::{parse_citations, verify_citations};
pub use config::{CitationMode, CitationPolicy, RuntimeConfig, WorkflowPolicy};
pub use events::{EventRecorder, NoopEventSink, SecurityEventSink, StepEventSink};
pub use evidence::{EvidenceProvider, InMemoryEvidenceProvider};
pub use guardrails::{FnGuardrails, GuardrailDecision, GuardrailsHook};
pub use proxy::{AgentOutput, AgentProxy, AgentProxyBuilder};
