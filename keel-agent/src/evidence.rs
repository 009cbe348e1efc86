//! Evidence lookup.

use async_trait::async_trait;
use dashmap::DashMap;
use keel_core::types::{Evidence, RequestContext};
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Source of verified evidence records, implemented by the retrieval layer.
#[async_trait]
pub trait EvidenceProvider: Send + Sync + Debug {
    /// Look up the evidence backing `citation_id`; `None` when unknown
    async fn get_evidence(
        &self,
        ctx: &RequestContext,
        citation_id: &str,
    ) -> anyhow::Result<Option<Evidence>>;
}

/// Evidence held in memory, keyed by citation id.
#[derive(Debug, Default)]
pub struct InMemoryEvidenceProvider {
    records: DashMap<String, Evidence>,
    lookups: AtomicUsize,
}

impl InMemoryEvidenceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, evidence: Evidence) {
        self.records.insert(evidence.citation_id.clone(), evidence);
    }

    /// Insert under an explicit key, which may differ from the record's citation id
    pub fn insert_as(&self, citation_id: impl Into<String>, evidence: Evidence) {
        self.records.insert(citation_id.into(), evidence);
    }

    pub fn with_evidence(self, evidence: Evidence) -> Self {
        self.insert(evidence);
        self
    }

    /// Number of lookups served so far
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EvidenceProvider for InMemoryEvidenceProvider {
    async fn get_evidence(
        &self,
        _ctx: &RequestContext,
        citation_id: &str,
    ) -> anyhow::Result<Option<Evidence>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self.records.get(citation_id).map(|entry| entry.value().clone()))
    }
}
