//! Citation verification.
//!
//! Citations produced by the model are parsed, checked against the request's
//! project, then corroborated one by one through an [`EvidenceProvider`].
//! Project isolation is enforced for every citation before any lookup.

use crate::evidence::EvidenceProvider;
use keel_core::error::AppError;
use keel_core::types::{Citation, RequestContext, ValidationIssue};
use serde_json::{json, Value};

/// Parse raw citations and check their invariants.
pub fn parse_citations(ctx: &RequestContext, raw: &Value) -> Result<Vec<Citation>, AppError> {
    let mut issues = Vec::new();
    let mut citations = Vec::new();

    match raw.as_array() {
        None => issues.push(ValidationIssue::new("", "Expected an array of citations", "invalid_type")),
        Some(items) => {
            for (i, item) in items.iter().enumerate() {
                let path = format!("[{}]", i);
                match serde_json::from_value::<Citation>(item.clone()) {
                    Ok(citation) => {
                        issues.extend(citation.issues(&path));
                        citations.push(citation);
                    }
                    Err(e) => issues.push(ValidationIssue::new(path, e.to_string(), "invalid_type")),
                }
            }
        }
    }

    if issues.is_empty() {
        Ok(citations)
    } else {
        Err(
            AppError::contract_violation(ctx, "Citation schema validation failed").with_details(json!({
                "reason": "CitationSchema validation failed",
                "issues": issues,
            })),
        )
    }
}

/// Verify citations against the evidence store.
///
/// Returns the parsed citations unchanged and in order.
pub async fn verify_citations(
    ctx: &RequestContext,
    raw: &Value,
    evidence: &dyn EvidenceProvider,
) -> Result<Vec<Citation>, AppError> {
    let citations = parse_citations(ctx, raw)?;

    if let Some(expected) = &ctx.project_id {
        if let Some(citation) = citations.iter().find(|c| &c.project_id != expected) {
            return Err(AppError::contract_violation(
                ctx,
                "Citation belongs to a different project",
            )
            .with_details(json!({
                "citationId": citation.citation_id,
                "expectedProjectId": expected,
                "actualProjectId": citation.project_id,
            })));
        }
    }

    for citation in &citations {
        if ctx.is_cancelled() {
            return Err(AppError::cancelled(ctx));
        }

        let record = evidence
            .get_evidence(ctx, &citation.citation_id)
            .await
            .map_err(|e| AppError::from_collaborator(ctx, e))?;

        let Some(record) = record else {
            return Err(AppError::contract_violation(ctx, "Citation is not verifiable")
                .with_details(json!({ "citationId": citation.citation_id })));
        };

        if record.citation_id != citation.citation_id {
            return Err(AppError::contract_violation(
                ctx,
                "Evidence does not match the citation",
            )
            .with_details(json!({
                "citationId": citation.citation_id,
                "evidenceCitationId": record.citation_id,
            })));
        }

        let expected = ctx.project_id.as_deref().unwrap_or(&citation.project_id);
        if record.project_id != expected {
            return Err(AppError::contract_violation(
                ctx,
                "Evidence belongs to a different project",
            )
            .with_details(json!({
                "citationId": citation.citation_id,
                "expectedProjectId": expected,
                "actualProjectId": record.project_id,
            })));
        }

        tracing::trace!(request_id = %ctx.request_id, citation_id = %citation.citation_id, "citation verified");
    }

    Ok(citations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::InMemoryEvidenceProvider;
    use keel_core::error::ErrorCode;
    use keel_core::types::{CitationStatus, Locator};

    fn citation(id: &str, project: &str) -> Citation {
        Citation {
            citation_id: id.to_string(),
            source_type: "document".to_string(),
            project_id: project.to_string(),
            locator: Locator {
                page: Some(3),
                ..Default::default()
            },
            status: CitationStatus::Verifiable,
            snippet: Some("revenue grew".to_string()),
            degraded_reason: None,
        }
    }

    fn raw(citations: &[Citation]) -> Value {
        serde_json::to_value(citations).unwrap()
    }

    #[tokio::test]
    async fn test_verified_citations_returned_unchanged() {
        let store = InMemoryEvidenceProvider::new()
            .with_evidence(citation("c-1", "p1"))
            .with_evidence(citation("c-2", "p1"));
        let ctx = RequestContext::new("tenant").with_project("p1");

        let input = vec![citation("c-2", "p1"), citation("c-1", "p1")];
        let verified = verify_citations(&ctx, &raw(&input), &store).await.unwrap();
        assert_eq!(verified, input);
        assert_eq!(store.lookups(), 2);
    }

    #[tokio::test]
    async fn test_project_mismatch_rejected_without_lookup() {
        let store = InMemoryEvidenceProvider::new().with_evidence(citation("c-1", "p1"));
        let ctx = RequestContext::new("tenant").with_project("p1");

        let input = vec![citation("c-1", "p1"), citation("c-9", "other")];
        let err = verify_citations(&ctx, &raw(&input), &store).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::ContractViolation);
        let details = err.details.unwrap();
        assert_eq!(details["citationId"], "c-9");
        assert_eq!(details["expectedProjectId"], "p1");
        assert_eq!(details["actualProjectId"], "other");
        assert_eq!(store.lookups(), 0);
    }

    #[tokio::test]
    async fn test_schema_failure_lists_issues() {
        let store = InMemoryEvidenceProvider::new();
        let ctx = RequestContext::new("tenant");

        let mut degraded = citation("c-1", "p1");
        degraded.status = CitationStatus::Degraded;
        let value = json!([serde_json::to_value(&degraded).unwrap(), {"citationId": 7}]);

        let err = verify_citations(&ctx, &value, &store).await.unwrap_err();
        let details = err.details.unwrap();
        assert_eq!(details["reason"], "CitationSchema validation failed");
        let paths: Vec<&str> = details["issues"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["path"].as_str().unwrap())
            .collect();
        assert_eq!(paths, vec!["[0].degradedReason", "[1]"]);
    }

    #[tokio::test]
    async fn test_unknown_citation() {
        let store = InMemoryEvidenceProvider::new();
        let ctx = RequestContext::new("tenant").with_project("p1");

        let err = verify_citations(&ctx, &raw(&[citation("c-1", "p1")]), &store)
            .await
            .unwrap_err();
        assert!(err.message.starts_with("Citation is not verifiable"));
    }

    #[tokio::test]
    async fn test_evidence_mismatches_are_distinct() {
        let ctx = RequestContext::new("tenant").with_project("p1");

        let wrong_id = InMemoryEvidenceProvider::new();
        wrong_id.insert_as("c-1", citation("c-2", "p1"));
        let err = verify_citations(&ctx, &raw(&[citation("c-1", "p1")]), &wrong_id)
            .await
            .unwrap_err();
        assert!(err.message.starts_with("Evidence does not match the citation"));

        let wrong_project = InMemoryEvidenceProvider::new();
        wrong_project.insert_as("c-1", citation("c-1", "p2"));
        let err = verify_citations(&ctx, &raw(&[citation("c-1", "p1")]), &wrong_project)
            .await
            .unwrap_err();
        assert!(err.message.starts_with("Evidence belongs to a different project"));
        assert_eq!(err.details.unwrap()["actualProjectId"], "p2");
    }

    #[derive(Debug)]
    struct Broken;

    #[async_trait::async_trait]
    impl EvidenceProvider for Broken {
        async fn get_evidence(
            &self,
            _ctx: &RequestContext,
            _citation_id: &str,
        ) -> anyhow::Result<Option<Citation>> {
            anyhow::bail!("evidence store unreachable")
        }
    }

    #[tokio::test]
    async fn test_lookup_failure_is_normalized() {
        let ctx = RequestContext::new("tenant").with_request_id("req-ev");
        let err = verify_citations(&ctx, &raw(&[citation("c-1", "p1")]), &Broken)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::UpstreamUnavailable);
        assert_eq!(err.request_id, "req-ev");
    }
}
