//! Runtime layer.
//!
//! The runtime sits between the orchestration layer, which only sees a
//! [`LanguageModel`](crate::model::LanguageModel), and the provider adapters.
//! It is responsible for:
//! - Resolving a route decision per call
//! - Retrying a candidate and falling back to the next one
//! - Degrading a failed stream to a plain text call
//! - Recording provider call metrics

pub mod executor;
pub mod metrics;

pub use executor::{HintResolver, ResilientModel, ResilientModelBuilder};
pub use metrics::{
    InMemoryMetricsSink, MetricKind, NoopMetricsSink, ProviderCallMetric, ProviderMetricsSink,
    TracingMetricsSink,
};
