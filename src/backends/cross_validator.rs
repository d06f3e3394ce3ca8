//! Composite backend that asks OpenAlex and Crossref together and reconciles
//! their answers.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::cache::cached_lookup;
use super::crossref::CrossrefBackend;
use super::http::ApiClient;
use super::openalex::OpenAlexBackend;
use super::{BackendError, EvidenceBackend};
use crate::db::Database;
use crate::types::{BackendResult, BackendStatus, EvidenceType, QueryInput};
use crate::validation::{CrossValidator, PublisherMetadataValidator};
use crate::TARGET_BACKEND;

pub struct CrossValidatorBackend {
    db: Database,
    openalex: OpenAlexBackend,
    crossref: CrossrefBackend,
    validator: PublisherMetadataValidator,
    cache_ttl_hours: i64,
}

impl CrossValidatorBackend {
    pub const NAME: &'static str = "cross_validator";

    /// Both sub-backends get the same contact email and cache TTL.
    pub fn new(
        db: Database,
        email: Option<String>,
        cache_ttl_hours: i64,
        openalex_base_url: &str,
        crossref_base_url: &str,
    ) -> Result<Self, BackendError> {
        let openalex_client = ApiClient::new("openalex", openalex_base_url, email.as_deref())?;
        let crossref_client = ApiClient::new("crossref", crossref_base_url, email.as_deref())?;

        Ok(CrossValidatorBackend {
            openalex: OpenAlexBackend::new(db.clone(), openalex_client, email.clone(), cache_ttl_hours),
            crossref: CrossrefBackend::new(db.clone(), crossref_client, email, cache_ttl_hours),
            db,
            validator: PublisherMetadataValidator,
            cache_ttl_hours,
        })
    }

    pub fn openalex(&self) -> &OpenAlexBackend {
        &self.openalex
    }

    pub fn crossref(&self) -> &CrossrefBackend {
        &self.crossref
    }

    async fn lookup(&self, query: &QueryInput) -> Result<BackendResult, BackendError> {
        let (openalex, crossref) = tokio::join!(self.openalex.query(query), self.crossref.query(query));
        let definitive = |r: &BackendResult| r.is_cacheable();

        if !definitive(&openalex) && !definitive(&crossref) {
            if let Some(limited) = [&openalex, &crossref]
                .into_iter()
                .find(|r| r.status == BackendStatus::RateLimited)
            {
                return Err(BackendError::RateLimited {
                    retry_after: limited.retry_after,
                });
            }
            return Err(BackendError::Parse(format!(
                "both sub-backends failed: {}; {}",
                openalex.error_message.as_deref().unwrap_or("unknown error"),
                crossref.error_message.as_deref().unwrap_or("unknown error")
            )));
        }

        if !openalex.is_found() && !crossref.is_found() {
            return Ok(BackendResult::not_found(Self::NAME, EvidenceType::Heuristic));
        }

        let outcome = self
            .validator
            .validate(OpenAlexBackend::NAME, &openalex, CrossrefBackend::NAME, &crossref);

        let found: Vec<&BackendResult> = [&openalex, &crossref]
            .into_iter()
            .filter(|r| r.is_found())
            .collect();
        let (assessment, base_confidence) = if outcome.agreement {
            let mean = found.iter().map(|r| r.confidence).sum::<f64>() / found.len() as f64;
            (openalex.assessment, mean)
        } else {
            // Disagreement or a single source: go with the more confident answer
            let strongest = found
                .iter()
                .max_by(|a, b| {
                    a.confidence
                        .partial_cmp(&b.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .copied()
                .unwrap_or(&openalex);
            (strongest.assessment, strongest.confidence)
        };

        debug!(
            target: TARGET_BACKEND,
            "cross_validator: {} agreement={} adjustment={:+.2}",
            query.normalized_name,
            outcome.agreement,
            outcome.confidence_adjustment
        );

        let publisher = found.iter().find_map(|r| r.data["publisher"].as_str());
        let data = json!({
            "agreement": outcome.agreement,
            "confidence_adjustment": outcome.confidence_adjustment,
            "consistency_checks": outcome.consistency_checks,
            "reasoning": outcome.reasoning,
            "publisher": publisher,
            "openalex": openalex.data,
            "crossref": crossref.data,
        });
        let sources = openalex
            .sources
            .iter()
            .chain(crossref.sources.iter())
            .cloned()
            .collect();

        Ok(BackendResult::found(
            Self::NAME,
            EvidenceType::Heuristic,
            base_confidence + outcome.confidence_adjustment,
            assessment,
            data,
        )
        .with_sources(sources))
    }
}

#[async_trait]
impl EvidenceBackend for CrossValidatorBackend {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn evidence_type(&self) -> EvidenceType {
        EvidenceType::Heuristic
    }

    fn cache_ttl_hours(&self) -> i64 {
        self.cache_ttl_hours
    }

    async fn query(&self, query: &QueryInput) -> BackendResult {
        cached_lookup(
            &self.db,
            Self::NAME,
            EvidenceType::Heuristic,
            self.cache_ttl_hours,
            query,
            || self.lookup(query),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::core::test_support::temp_database;
    use crate::normalizer::normalize;
    use crate::types::AssessmentType;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn test_forwards_email_and_ttl_to_both_sub_backends() {
        let (db, _dir) = temp_database().await;
        let backend = CrossValidatorBackend::new(
            db,
            Some("ops@example.org".to_string()),
            48,
            "http://localhost:1",
            "http://localhost:2",
        )
        .unwrap();

        assert_eq!(backend.openalex().email(), Some("ops@example.org"));
        assert_eq!(backend.crossref().email(), Some("ops@example.org"));
        assert_eq!(backend.openalex().cache_ttl_hours(), 48);
        assert_eq!(backend.crossref().cache_ttl_hours(), 48);
        assert_eq!(backend.cache_ttl_hours(), 48);
    }

    #[tokio::test]
    async fn test_agreeing_sources_raise_confidence() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/sources")
                    .query_param("filter", "issn:0028-0836");
                then.status(200).json_body(json!({"results": [{
                    "id": "https://openalex.org/S137773608",
                    "display_name": "Nature",
                    "host_organization_name": "Nature Portfolio",
                    "works_count": 420000,
                    "cited_by_count": 26000000,
                    "summary_stats": {"h_index": 1200}
                }]}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/journals/0028-0836");
                then.status(200).json_body(json!({"status": "ok", "message": {
                    "title": "Nature",
                    "publisher": "Nature Portfolio Ltd",
                    "counts": {"total-dois": 400000},
                    "coverage": {"references-current": 0.9, "abstracts-current": 0.5}
                }}));
            })
            .await;

        let (db, _dir) = temp_database().await;
        let backend =
            CrossValidatorBackend::new(db, None, 24, &server.base_url(), &server.base_url()).unwrap();
        let result = backend.query(&normalize("Nature (ISSN: 0028-0836)").unwrap()).await;

        assert_eq!(result.status, BackendStatus::Found);
        assert_eq!(result.assessment, Some(AssessmentType::Legitimate));
        assert_eq!(result.data["agreement"], true);
        // mean(0.80, 0.68) plus agreement and publisher bonuses
        assert!((result.confidence - 0.89).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_neither_found_is_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/sources");
                then.status(200).json_body(json!({"results": []}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/journals");
                then.status(200).json_body(json!({"message": {"items": []}}));
            })
            .await;

        let (db, _dir) = temp_database().await;
        let backend =
            CrossValidatorBackend::new(db, None, 24, &server.base_url(), &server.base_url()).unwrap();
        let result = backend.query(&normalize("Journal of Nothing").unwrap()).await;
        assert_eq!(result.status, BackendStatus::NotFound);
    }
}
