//! Crossref journals API: DOI volume and metadata-deposit quality.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::cache::cached_lookup;
use super::http::ApiClient;
use super::{best_title_match, BackendError, EvidenceBackend};
use crate::confidence::{calculate_base_confidence, MatchQuality};
use crate::db::Database;
use crate::fallback::{FallbackChain, FallbackStrategy};
use crate::types::{AssessmentType, BackendResult, EvidenceType, QueryInput};
use crate::TARGET_BACKEND;

pub const CROSSREF_BASE_URL: &str = "https://api.crossref.org";
const ROWS: &str = "10";
/// Coverage fields averaged into the metadata-quality score
const COVERAGE_FIELDS: &[&str] = &[
    "references-current",
    "abstracts-current",
    "orcids-current",
    "licenses-current",
];

pub struct CrossrefBackend {
    client: ApiClient,
    db: Database,
    email: Option<String>,
    cache_ttl_hours: i64,
}

/// Mean of the deposited-metadata coverage ratios present on a journal record
pub fn metadata_quality(journal: &Value) -> Option<f64> {
    let values: Vec<f64> = COVERAGE_FIELDS
        .iter()
        .filter_map(|field| journal["coverage"][*field].as_f64())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub fn assess_journal_record(journal: &Value) -> (Option<AssessmentType>, f64, Vec<String>) {
    let dois = journal["counts"]["total-dois"].as_i64().unwrap_or(0);
    let mut reasons = Vec::new();

    if dois <= 0 {
        reasons.push("No registered DOIs".to_string());
        return (None, 0.3, reasons);
    }
    reasons.push(format!("{} registered DOIs", dois));

    match metadata_quality(journal) {
        Some(score) if dois >= 100 && score >= 0.5 => {
            reasons.push(format!("Rich deposited metadata ({:.0}% coverage)", score * 100.0));
            (Some(AssessmentType::Legitimate), 0.4 + 0.4 * score, reasons)
        }
        Some(score) if dois >= 100 && score < 0.1 => {
            reasons.push("Minimal deposited metadata for a high-volume venue".to_string());
            (Some(AssessmentType::Questionable), 0.45, reasons)
        }
        _ => (None, 0.4, reasons),
    }
}

fn title_of(item: &Value) -> Option<&str> {
    item["title"].as_str()
}

impl CrossrefBackend {
    pub const NAME: &'static str = "crossref_analyzer";

    pub fn new(db: Database, client: ApiClient, email: Option<String>, cache_ttl_hours: i64) -> Self {
        CrossrefBackend {
            client,
            db,
            email,
            cache_ttl_hours,
        }
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    fn polite_params(&self) -> Vec<(&'static str, String)> {
        self.email
            .iter()
            .map(|email| ("mailto", email.clone()))
            .collect()
    }

    async fn journal_by_issn(&self, issn: &str) -> Result<Option<Value>, BackendError> {
        let body = self
            .client
            .get_json(&["journals", issn], &self.polite_params())
            .await?;
        Ok(body.map(|b| b["message"].clone()).filter(|m| m.is_object()))
    }

    async fn search(&self, title: &str) -> Result<Vec<Value>, BackendError> {
        let mut params = vec![("query", title.to_string()), ("rows", ROWS.to_string())];
        params.extend(self.polite_params());
        let body = self.client.get_json(&["journals"], &params).await?;
        Ok(body
            .and_then(|b| b["message"]["items"].as_array().cloned())
            .unwrap_or_default())
    }

    async fn lookup(&self, query: &QueryInput) -> Result<BackendResult, BackendError> {
        let mut chain = FallbackChain::default();

        for candidate in chain.plan(query) {
            let matched = match candidate.strategy {
                FallbackStrategy::Issn | FallbackStrategy::Eissn => self
                    .journal_by_issn(&candidate.value)
                    .await?
                    .map(|journal| (journal, MatchQuality::ExactIssn)),
                FallbackStrategy::NormalizedName | FallbackStrategy::Aliases => {
                    let items = self.search(&candidate.value).await?;
                    let is_alias = candidate.strategy == FallbackStrategy::Aliases;
                    best_title_match(&candidate.value, is_alias, &items, title_of)
                        .map(|(item, quality)| (item.clone(), quality))
                }
            };

            let Some((journal, quality)) = matched else {
                chain.log_attempt(candidate.strategy, false, &candidate.value, None);
                continue;
            };
            let match_confidence = calculate_base_confidence(quality);
            chain.log_attempt(candidate.strategy, true, &candidate.value, Some(match_confidence));

            let (assessment, heuristic_confidence, reasons) = assess_journal_record(&journal);
            debug!(
                target: TARGET_BACKEND,
                "crossref: {} -> {:?} ({:.2})",
                query.normalized_name,
                assessment,
                heuristic_confidence
            );

            let data = json!({
                "title": journal["title"],
                "publisher": journal["publisher"],
                "issn": journal["ISSN"],
                "publication_count": journal["counts"]["total-dois"],
                "current_dois": journal["counts"]["current-dois"],
                "metadata_quality": metadata_quality(&journal),
                "match_quality": quality,
                "reasons": reasons,
            });

            return Ok(BackendResult::found(
                Self::NAME,
                EvidenceType::Heuristic,
                match_confidence * heuristic_confidence,
                assessment,
                data,
            )
            .with_sources(vec![format!("{}/journals", self.client.base_url())])
            .with_fallback_chain(chain.get_attempt_summary()));
        }

        Ok(BackendResult::not_found(Self::NAME, EvidenceType::Heuristic)
            .with_fallback_chain(chain.get_attempt_summary()))
    }
}

#[async_trait]
impl EvidenceBackend for CrossrefBackend {
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
    use crate::types::BackendStatus;
    use httpmock::prelude::*;
    use std::time::Duration;

    #[test]
    fn test_assess_journal_record() {
        let rich = json!({
            "counts": {"total-dois": 5000},
            "coverage": {"references-current": 1.0, "abstracts-current": 0.5}
        });
        let (assessment, confidence, _) = assess_journal_record(&rich);
        assert_eq!(assessment, Some(AssessmentType::Legitimate));
        assert!((confidence - 0.7).abs() < 1e-9);

        let bare = json!({
            "counts": {"total-dois": 800},
            "coverage": {"references-current": 0.0, "abstracts-current": 0.0}
        });
        assert_eq!(assess_journal_record(&bare).0, Some(AssessmentType::Questionable));
        assert_eq!(assess_journal_record(&json!({})).0, None);
    }

    #[tokio::test]
    async fn test_falls_back_from_issn_to_name() {
        let server = MockServer::start_async().await;
        let issn_mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/journals/1234-5679");
                then.status(404);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/journals")
                    .query_param("query", "Journal of Stuff");
                then.status(200).json_body(json!({
                    "status": "ok",
                    "message": {"items": [{
                        "title": "Journal of Stuff",
                        "publisher": "Shady Press",
                        "ISSN": ["9999-9999"],
                        "counts": {"total-dois": 900},
                        "coverage": {"references-current": 0.0}
                    }]}
                }));
            })
            .await;

        let (db, _dir) = temp_database().await;
        let client = ApiClient::new("crossref", &server.base_url(), None)
            .unwrap()
            .with_retry_policy(1, Duration::from_millis(1));
        let backend = CrossrefBackend::new(db, client, None, 24);

        let result = backend
            .query(&normalize("Journal of Stuff ISSN 1234-5679").unwrap())
            .await;
        issn_mock.assert_async().await;
        assert_eq!(result.status, BackendStatus::Found);
        assert_eq!(result.assessment, Some(AssessmentType::Questionable));
        assert_eq!(result.data["publisher"], "Shady Press");
        assert_eq!(result.data["publication_count"], 900);
        assert_eq!(
            result.fallback_chain.as_deref(),
            Some("issn(fail) → normalized_name(success, conf=0.95)")
        );
        assert!((result.confidence - 0.95 * 0.45).abs() < 1e-9);
    }
}
