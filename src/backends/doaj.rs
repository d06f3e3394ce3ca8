//! Directory of Open Access Journals: inclusion is evidence of legitimacy.

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

pub const DOAJ_BASE_URL: &str = "https://doaj.org/api";
const PAGE_SIZE: &str = "10";

pub struct DoajBackend {
    client: ApiClient,
    db: Database,
    cache_ttl_hours: i64,
}

fn title_of(item: &Value) -> Option<&str> {
    item["bibjson"]["title"].as_str()
}

impl DoajBackend {
    pub const NAME: &'static str = "doaj";

    pub fn new(db: Database, client: ApiClient, cache_ttl_hours: i64) -> Self {
        DoajBackend {
            client,
            db,
            cache_ttl_hours,
        }
    }

    async fn search(&self, search_query: &str) -> Result<Vec<Value>, BackendError> {
        let body = self
            .client
            .get_json(
                &["search", "journals", search_query],
                &[("pageSize", PAGE_SIZE.to_string())],
            )
            .await?;
        Ok(body
            .and_then(|b| b["results"].as_array().cloned())
            .unwrap_or_default())
    }

    fn found(&self, item: &Value, quality: MatchQuality, chain: &FallbackChain) -> BackendResult {
        let bibjson = &item["bibjson"];
        let data = json!({
            "title": bibjson["title"],
            "publisher": bibjson["publisher"]["name"],
            "issn": bibjson["pissn"],
            "eissn": bibjson["eissn"],
            "has_apc": bibjson["apc"]["has_apc"],
            "doaj_seal": item["admin"]["seal"],
            "added_on": item["created_date"],
            "match_quality": quality,
        });
        let mut sources = vec![format!("{}/search/journals", self.client.base_url())];
        if let Some(id) = item["id"].as_str() {
            sources.push(format!("https://doaj.org/toc/{}", id));
        }
        BackendResult::found(
            Self::NAME,
            EvidenceType::LegitimateList,
            calculate_base_confidence(quality),
            Some(AssessmentType::Legitimate),
            data,
        )
        .with_sources(sources)
        .with_fallback_chain(chain.get_attempt_summary())
    }

    async fn lookup(&self, query: &QueryInput) -> Result<BackendResult, BackendError> {
        let mut chain = FallbackChain::default();

        for candidate in chain.plan(query) {
            let matched = match candidate.strategy {
                FallbackStrategy::Issn | FallbackStrategy::Eissn => {
                    let results = self.search(&format!("issn:{}", candidate.value)).await?;
                    results
                        .into_iter()
                        .next()
                        .map(|item| (item, MatchQuality::ExactIssn))
                }
                FallbackStrategy::NormalizedName | FallbackStrategy::Aliases => {
                    let results = self
                        .search(&format!("bibjson.title:\"{}\"", candidate.value.replace('"', "")))
                        .await?;
                    let is_alias = candidate.strategy == FallbackStrategy::Aliases;
                    best_title_match(&candidate.value, is_alias, &results, title_of)
                        .map(|(item, quality)| (item.clone(), quality))
                }
            };

            match matched {
                Some((item, quality)) => {
                    chain.log_attempt(
                        candidate.strategy,
                        true,
                        &candidate.value,
                        Some(calculate_base_confidence(quality)),
                    );
                    debug!(target: TARGET_BACKEND, "doaj: matched {:?} via {}", title_of(&item), candidate.strategy);
                    return Ok(self.found(&item, quality, &chain));
                }
                None => chain.log_attempt(candidate.strategy, false, &candidate.value, None),
            }
        }

        Ok(BackendResult::not_found(Self::NAME, EvidenceType::LegitimateList)
            .with_fallback_chain(chain.get_attempt_summary()))
    }
}

#[async_trait]
impl EvidenceBackend for DoajBackend {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn evidence_type(&self) -> EvidenceType {
        EvidenceType::LegitimateList
    }

    fn cache_ttl_hours(&self) -> i64 {
        self.cache_ttl_hours
    }

    async fn query(&self, query: &QueryInput) -> BackendResult {
        cached_lookup(
            &self.db,
            Self::NAME,
            EvidenceType::LegitimateList,
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

    async fn backend(server: &MockServer) -> (DoajBackend, tempfile::TempDir) {
        let (db, dir) = temp_database().await;
        let client = ApiClient::new("doaj", &server.base_url(), None)
            .unwrap()
            .with_retry_policy(2, Duration::from_millis(1));
        (DoajBackend::new(db, client, 24), dir)
    }

    #[tokio::test]
    async fn test_found_by_issn() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/search/journals/issn:2049-3630");
                then.status(200).json_body(json!({
                    "total": 1,
                    "results": [{
                        "id": "abc123",
                        "bibjson": {
                            "title": "Open Health Data",
                            "publisher": {"name": "Ubiquity Press"},
                            "eissn": "2049-3630",
                            "apc": {"has_apc": true}
                        }
                    }]
                }));
            })
            .await;

        let (backend, _dir) = backend(&server).await;
        let result = backend
            .query(&normalize("Open Health Data eISSN 2049-3630").unwrap())
            .await;
        assert_eq!(result.status, BackendStatus::Found);
        assert_eq!(result.assessment, Some(AssessmentType::Legitimate));
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.data["publisher"], "Ubiquity Press");
    }

    #[tokio::test]
    async fn test_title_mismatch_is_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(200).json_body(json!({
                    "total": 1,
                    "results": [{"bibjson": {"title": "Completely Unrelated Quarterly"}}]
                }));
            })
            .await;

        let (backend, _dir) = backend(&server).await;
        let result = backend.query(&normalize("Journal of Stuff").unwrap()).await;
        assert_eq!(result.status, BackendStatus::NotFound);
    }

    #[tokio::test]
    async fn test_rate_limit_surfaces_and_is_not_cached() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(429).header("retry-after", "0");
            })
            .await;

        let (backend, _dir) = backend(&server).await;
        let query = normalize("Journal of Stuff").unwrap();
        let first = backend.query(&query).await;
        assert_eq!(first.status, BackendStatus::RateLimited);
        assert_eq!(first.retry_after, Some(0));

        let second = backend.query(&query).await;
        assert_eq!(second.status, BackendStatus::RateLimited);
        assert!(!second.cached);
        // 3 attempts per query, nothing served from cache
        mock.assert_calls_async(6).await;
    }
}
