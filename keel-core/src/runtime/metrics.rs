//! Provider call metrics.

use crate::types::Usage;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt::Debug;

/// Which executor path produced a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    GenerateText,
    StreamText,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::GenerateText => "generate_text",
            MetricKind::StreamText => "stream_text",
        }
    }
}

/// One provider call attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCallMetric {
    pub kind: MetricKind,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub provider_id: String,
    pub model_id: String,
    /// 1-based attempt number against this candidate
    pub attempt: u32,
    pub started_at_iso: String,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttft_ms: Option<u64>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Receives provider call metrics.
///
/// Called inline from the executor and never awaited, so implementations
/// must be cheap and safe to call concurrently.
pub trait ProviderMetricsSink: Send + Sync + Debug {
    fn record(&self, metric: ProviderCallMetric);
}

/// Emits each metric as a `tracing` event on target `keel::metrics`.
#[derive(Debug, Clone, Default)]
pub struct TracingMetricsSink;

impl ProviderMetricsSink for TracingMetricsSink {
    fn record(&self, metric: ProviderCallMetric) {
        tracing::info!(
            target: "keel::metrics",
            kind = metric.kind.as_str(),
            request_id = %metric.request_id,
            task_id = ?metric.task_id,
            provider_id = %metric.provider_id,
            model_id = %metric.model_id,
            attempt = metric.attempt,
            started_at = %metric.started_at_iso,
            duration_ms = metric.duration_ms,
            ttft_ms = ?metric.ttft_ms,
            success = metric.success,
            error = ?metric.error_message,
            total_tokens = ?metric.usage.map(|u| u.total_tokens),
            "provider call"
        );
    }
}

/// Keeps every metric in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetricsSink {
    metrics: Mutex<Vec<ProviderCallMetric>>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded metrics
    pub fn metrics(&self) -> Vec<ProviderCallMetric> {
        self.metrics.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.metrics.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.lock().is_empty()
    }

    pub fn clear(&self) {
        self.metrics.lock().clear();
    }
}

impl ProviderMetricsSink for InMemoryMetricsSink {
    fn record(&self, metric: ProviderCallMetric) {
        self.metrics.lock().push(metric);
    }
}

#[derive(Debug, Clone, Default)]
pub struct NoopMetricsSink;

impl ProviderMetricsSink for NoopMetricsSink {
    fn record(&self, _metric: ProviderCallMetric) {}
}
