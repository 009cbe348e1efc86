//! Response cache key derivation.
//!
//! A cache key is `cache:v1:sha256:<hex>`, a deterministic function of the
//! tenant, project, template identity, message contents, retrieval query or
//! citation set, and model identity. Citation order does not matter.

use crate::canonical::stable_hash;
use crate::types::{Role, ValidationIssue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Key prefix; bump the version when the derivation changes
pub const CACHE_KEY_PREFIX: &str = "cache:v1:sha256:";

/// Template identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRef {
    pub id: String,
    pub version: u32,
    /// Definition hash, see [`template_definition_hash`]; preferred over id/version when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl TemplateRef {
    pub fn new(id: impl Into<String>, version: u32) -> Self {
        Self {
            id: id.into(),
            version,
            hash: None,
        }
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    fn formatted(&self) -> String {
        match &self.hash {
            Some(hash) => format!("hash:{}", hash),
            None => format!("id:{}@{}", self.id, self.version),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheMessage {
    pub role: Role,
    pub content: String,
}

impl CacheMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Retrieval query used when no citations are attached
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalRef {
    pub provider_id: String,
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CitationRef {
    pub citation_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub provider_id: String,
    pub model_id: String,
    pub version: String,
}

impl ModelInfo {
    fn formatted(&self) -> String {
        format!("{}:{}:{}", self.provider_id, self.model_id, self.version)
    }
}

/// Everything a cached response depends on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseCacheKeyInput {
    pub tenant_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    pub template_ref: TemplateRef,
    pub messages: Vec<CacheMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval: Option<RetrievalRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<CitationRef>>,
    pub model_info: ModelInfo,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheKeyError {
    #[error("invalid cache key input: {}", summarize(.0))]
    InvalidInput(Vec<ValidationIssue>),

    #[error("cache key serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn summarize(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("{}: {}", issue.path, issue.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ResponseCacheKeyInput {
    /// Structural checks run before hashing
    pub fn validate(&self) -> Result<(), CacheKeyError> {
        let mut issues = Vec::new();
        let mut require = |ok: bool, path: &str, message: &str| {
            if !ok {
                issues.push(ValidationIssue::new(path, message, "invalid"));
            }
        };

        require(!self.tenant_id.is_empty(), "tenantId", "must not be empty");
        if let Some(project_id) = &self.project_id {
            require(!project_id.is_empty(), "projectId", "must not be empty");
        }
        require(!self.template_ref.id.is_empty(), "templateRef.id", "must not be empty");
        require(self.template_ref.version >= 1, "templateRef.version", "must be at least 1");
        if let Some(hash) = &self.template_ref.hash {
            require(!hash.is_empty(), "templateRef.hash", "must not be empty");
        }
        require(!self.messages.is_empty(), "messages", "must contain at least one message");
        if let Some(retrieval) = &self.retrieval {
            require(!retrieval.provider_id.is_empty(), "retrieval.providerId", "must not be empty");
        }
        if let Some(citations) = &self.citations {
            for (i, citation) in citations.iter().enumerate() {
                require(
                    !citation.citation_id.is_empty(),
                    &format!("citations[{}].citationId", i),
                    "must not be empty",
                );
            }
        }
        require(!self.model_info.provider_id.is_empty(), "modelInfo.providerId", "must not be empty");
        require(!self.model_info.model_id.is_empty(), "modelInfo.modelId", "must not be empty");
        require(!self.model_info.version.is_empty(), "modelInfo.version", "must not be empty");

        if issues.is_empty() {
            Ok(())
        } else {
            Err(CacheKeyError::InvalidInput(issues))
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyRecord<'a> {
    tenant_id: &'a str,
    project_id: Option<&'a str>,
    template_ref: String,
    input_hash: String,
    retrieval_hash: String,
    model_info: String,
}

#[derive(Serialize)]
struct RetrievalRecord<'a> {
    #[serde(rename = "providerId")]
    provider_id: &'a str,
    query: &'a str,
}

/// Derive the response cache key for `input`.
///
/// Malformed input is rejected rather than hashed.
pub fn compute_response_cache_key(input: &ResponseCacheKeyInput) -> Result<String, CacheKeyError> {
    input.validate()?;

    let input_hash = stable_hash(&input.messages)?;

    let retrieval_hash = match (&input.citations, &input.retrieval) {
        (Some(citations), _) => {
            let ids: BTreeSet<&str> = citations.iter().map(|c| c.citation_id.as_str()).collect();
            stable_hash(&ids)?
        }
        (None, Some(retrieval)) => stable_hash(&RetrievalRecord {
            provider_id: &retrieval.provider_id,
            query: &retrieval.query,
        })?,
        (None, None) => String::new(),
    };

    let record = KeyRecord {
        tenant_id: &input.tenant_id,
        project_id: input.project_id.as_deref(),
        template_ref: input.template_ref.formatted(),
        input_hash,
        retrieval_hash,
        model_info: input.model_info.formatted(),
    };

    Ok(format!("{}{}", CACHE_KEY_PREFIX, stable_hash(&record)?))
}

/// Hash of a template definition, for [`TemplateRef::hash`].
pub fn template_definition_hash(definition: &serde_json::Value) -> Result<String, serde_json::Error> {
    stable_hash(definition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn input() -> ResponseCacheKeyInput {
        ResponseCacheKeyInput {
            tenant_id: "tenant-a".to_string(),
            project_id: Some("project-1".to_string()),
            template_ref: TemplateRef::new("summarize", 3),
            messages: vec![
                CacheMessage::new(Role::System, "You summarize documents."),
                CacheMessage::new(Role::User, "Summarize the report."),
            ],
            retrieval: None,
            citations: Some(vec![
                CitationRef {
                    citation_id: "c-1".to_string(),
                },
                CitationRef {
                    citation_id: "c-2".to_string(),
                },
                CitationRef {
                    citation_id: "c-3".to_string(),
                },
            ]),
            model_info: ModelInfo {
                provider_id: "openai".to_string(),
                model_id: "gpt-4o-mini".to_string(),
                version: "2024-07-18".to_string(),
            },
        }
    }

    fn is_well_formed(key: &str) -> bool {
        key.strip_prefix(CACHE_KEY_PREFIX).map_or(false, |hex| {
            hex.len() == 64 && hex.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
        })
    }

    #[test]
    fn test_deterministic_and_well_formed() {
        let first = compute_response_cache_key(&input()).unwrap();
        let second = compute_response_cache_key(&input()).unwrap();
        assert_eq!(first, second);
        assert!(is_well_formed(&first), "{}", first);
    }

    #[test]
    fn test_messages_change_key() {
        let mut changed = input();
        changed.messages[1].content.push('!');
        assert_ne!(
            compute_response_cache_key(&input()).unwrap(),
            compute_response_cache_key(&changed).unwrap()
        );
    }

    #[test]
    fn test_template_ref_changes_key() {
        let base = compute_response_cache_key(&input()).unwrap();

        let mut bumped = input();
        bumped.template_ref.version = 4;
        assert_ne!(base, compute_response_cache_key(&bumped).unwrap());

        let mut hashed = input();
        hashed.template_ref = hashed.template_ref.with_hash("abc123");
        assert_ne!(base, compute_response_cache_key(&hashed).unwrap());
    }

    #[test]
    fn test_citations_take_precedence_over_retrieval() {
        let mut with_retrieval = input();
        with_retrieval.retrieval = Some(RetrievalRef {
            provider_id: "vector".to_string(),
            query: "quarterly revenue".to_string(),
        });
        assert_eq!(
            compute_response_cache_key(&input()).unwrap(),
            compute_response_cache_key(&with_retrieval).unwrap()
        );

        with_retrieval.citations = None;
        assert_ne!(
            compute_response_cache_key(&input()).unwrap(),
            compute_response_cache_key(&with_retrieval).unwrap()
        );
    }

    #[test]
    fn test_invalid_input_rejected() {
        let mut bad = input();
        bad.tenant_id.clear();
        bad.messages.clear();
        match compute_response_cache_key(&bad) {
            Err(CacheKeyError::InvalidInput(issues)) => {
                let paths: Vec<&str> = issues.iter().map(|i| i.path.as_str()).collect();
                assert_eq!(paths, vec!["tenantId", "messages"]);
            }
            other => panic!("expected invalid input, got {:?}", other),
        }
    }

    #[test]
    fn test_load_from_json() {
        let parsed: ResponseCacheKeyInput = serde_json::from_value(serde_json::json!({
            "tenantId": "tenant-a",
            "projectId": null,
            "templateRef": {"id": "qa", "version": 1},
            "messages": [{"role": "user", "content": "hi"}],
            "retrieval": {"providerId": "vector", "query": "hi"},
            "modelInfo": {"providerId": "openai", "modelId": "gpt-4o", "version": "1"}
        }))
        .unwrap();
        assert!(is_well_formed(&compute_response_cache_key(&parsed).unwrap()));
    }

    #[test]
    fn test_template_definition_hash_ignores_key_order() {
        let a = serde_json::json!({"prompt": "x", "schema": {"type": "object", "required": []}});
        let b = serde_json::json!({"schema": {"required": [], "type": "object"}, "prompt": "x"});
        assert_eq!(
            template_definition_hash(&a).unwrap(),
            template_definition_hash(&b).unwrap()
        );
    }

    #[test]
    fn test_repeated_citation_ids_collapse() {
        let with = |ids: &[&str]| {
            let mut input = input();
            input.citations = Some(
                ids.iter()
                    .map(|id| CitationRef { citation_id: id.to_string() })
                    .collect(),
            );
            compute_response_cache_key(&input).unwrap()
        };

        assert_eq!(with(&["c1", "c2"]), with(&["c2", "c1", "c1"]));
        assert_ne!(with(&["c1", "c2"]), with(&["c1"]));
    }

    proptest! {
        #[test]
        fn prop_citation_order_irrelevant(
            ids in proptest::collection::hash_set("[a-z0-9]{1,8}", 1..10),
            seed in any::<u64>(),
        ) {
            let ordered: Vec<String> = ids.into_iter().collect();
            let mut shuffled = ordered.clone();
            // Deterministic rotation plus reversal driven by the seed
            let len = shuffled.len();
            shuffled.rotate_left((seed as usize) % len);
            if seed % 2 == 0 {
                shuffled.reverse();
            }

            let with = |ids: &[String]| {
                let mut input = input();
                input.citations = Some(
                    ids.iter()
                        .map(|id| CitationRef { citation_id: id.clone() })
                        .collect(),
                );
                compute_response_cache_key(&input).unwrap()
            };

            prop_assert_eq!(with(&ordered), with(&shuffled));
        }
    }
}
