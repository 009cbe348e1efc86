//! Event sinks for step and security events.
//!
//! Sinks are synchronous and must not block; transport code usually hands
//! events to a channel. Unbounded mpsc senders implement both traits.

use crate::config::RuntimeConfig;
use chrono::Utc;
use keel_core::event::{SecurityEvent, StepEvent, StepEventKind};
use keel_core::types::RequestContext;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Receives step lifecycle events
pub trait StepEventSink: Send + Sync + Debug {
    fn emit(&self, event: StepEvent);
}

/// Receives security events
pub trait SecurityEventSink: Send + Sync + Debug {
    fn emit(&self, event: SecurityEvent);
}

impl StepEventSink for UnboundedSender<StepEvent> {
    fn emit(&self, event: StepEvent) {
        if self.send(event).is_err() {
            tracing::debug!("step event receiver dropped");
        }
    }
}

impl SecurityEventSink for UnboundedSender<SecurityEvent> {
    fn emit(&self, event: SecurityEvent) {
        if self.send(event).is_err() {
            tracing::debug!("security event receiver dropped");
        }
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl StepEventSink for NoopEventSink {
    fn emit(&self, _event: StepEvent) {}
}

impl SecurityEventSink for NoopEventSink {
    fn emit(&self, _event: SecurityEvent) {}
}

/// Keeps every event in memory. Handy in tests and for audit dumps.
#[derive(Debug, Default)]
pub struct EventRecorder {
    steps: Mutex<Vec<StepEvent>>,
    security: Mutex<Vec<SecurityEvent>>,
}

impl EventRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn steps(&self) -> Vec<StepEvent> {
        self.steps.lock().clone()
    }

    pub fn security_events(&self) -> Vec<SecurityEvent> {
        self.security.lock().clone()
    }

    /// The `type` tags of the recorded step events, in order
    pub fn step_types(&self) -> Vec<&'static str> {
        self.steps.lock().iter().map(|e| e.kind.type_name()).collect()
    }
}

impl StepEventSink for EventRecorder {
    fn emit(&self, event: StepEvent) {
        self.steps.lock().push(event);
    }
}

impl SecurityEventSink for EventRecorder {
    fn emit(&self, event: SecurityEvent) {
        self.security.lock().push(event);
    }
}

/// Stamps step events with the ids of one step run.
pub(crate) struct StepEmitter<'a> {
    sink: &'a dyn StepEventSink,
    ctx: &'a RequestContext,
    config: &'a RuntimeConfig,
}

impl<'a> StepEmitter<'a> {
    pub(crate) fn new(
        sink: &'a dyn StepEventSink,
        ctx: &'a RequestContext,
        config: &'a RuntimeConfig,
    ) -> Self {
        Self { sink, ctx, config }
    }

    pub(crate) fn emit(&self, kind: StepEventKind) {
        tracing::trace!(request_id = %self.ctx.request_id, event = kind.type_name(), "step event");
        self.sink.emit(StepEvent {
            task_id: self.config.task_id.clone(),
            step_id: self.config.step_id.clone(),
            step_name: self.config.step_name.clone(),
            timestamp: Utc::now(),
            request_id: self.ctx.request_id.clone(),
            kind,
        });
    }

    pub(crate) fn progress(&self, phase: &str) {
        self.emit(StepEventKind::StepProgress {
            phase: phase.to_string(),
        });
    }
}
