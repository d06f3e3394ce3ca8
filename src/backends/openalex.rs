//! OpenAlex sources API: publication volume and citation heuristics.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::cache::cached_lookup;
use super::http::ApiClient;
use super::{best_title_match, BackendError, EvidenceBackend};
use crate::confidence::{calculate_base_confidence, MatchQuality};
use crate::db::{Database, OrganizationRecord, PublicationMetrics};
use crate::fallback::{FallbackChain, FallbackStrategy};
use crate::types::{AssessmentType, BackendResult, EvidenceType, QueryInput};
use crate::TARGET_BACKEND;

pub const OPENALEX_BASE_URL: &str = "https://api.openalex.org";
const PER_PAGE: &str = "10";

pub struct OpenAlexBackend {
    client: ApiClient,
    db: Database,
    email: Option<String>,
    cache_ttl_hours: i64,
}

/// Category and confidence suggested by a venue's publication metrics, with the
/// reasons behind it.
pub fn assess_metrics(metrics: &PublicationMetrics) -> (Option<AssessmentType>, f64, Vec<String>) {
    let works = metrics.total_works.unwrap_or(0);
    let cites = metrics.cited_by_count.unwrap_or(0);
    let mut reasons = Vec::new();

    if works <= 0 {
        reasons.push("No indexed publications".to_string());
        return (None, 0.3, reasons);
    }

    let citations_per_work = cites as f64 / works as f64;
    reasons.push(format!(
        "{} works, {:.1} citations per work",
        works, citations_per_work
    ));

    let (assessment, mut confidence): (Option<AssessmentType>, f64) = if works >= 1000 && citations_per_work >= 5.0 {
        reasons.push("Large, well-cited publication record".to_string());
        (Some(AssessmentType::Legitimate), 0.75)
    } else if works >= 200 && citations_per_work < 1.0 {
        reasons.push("High publication volume with very low citation rate".to_string());
        (Some(AssessmentType::Questionable), 0.55)
    } else if citations_per_work >= 2.0 {
        (Some(AssessmentType::Legitimate), 0.5)
    } else {
        (None, 0.4)
    };

    if let Some(h_index) = metrics.h_index {
        if h_index >= 50 && assessment == Some(AssessmentType::Legitimate) {
            reasons.push(format!("h-index {}", h_index));
            confidence += 0.05;
        }
    }
    if metrics.is_in_doaj == Some(true) && assessment == Some(AssessmentType::Legitimate) {
        reasons.push("Indexed in DOAJ according to OpenAlex".to_string());
        confidence += 0.05;
    }

    (assessment, confidence.min(1.0), reasons)
}

fn title_of(item: &Value) -> Option<&str> {
    item["display_name"].as_str()
}

fn short_id(openalex_url: &str) -> &str {
    openalex_url.rsplit('/').next().unwrap_or(openalex_url)
}

fn metrics_from_source(item: &Value, normalized_name: &str, issn: Option<String>) -> PublicationMetrics {
    let years: Vec<i32> = item["counts_by_year"]
        .as_array()
        .map(|counts| {
            counts
                .iter()
                .filter(|c| c["works_count"].as_i64().unwrap_or(0) > 0)
                .filter_map(|c| c["year"].as_i64().map(|y| y as i32))
                .collect()
        })
        .unwrap_or_default();

    PublicationMetrics {
        normalized_name: normalized_name.to_string(),
        issn,
        display_name: item["display_name"].as_str().map(String::from),
        publisher: item["host_organization_name"].as_str().map(String::from),
        total_works: item["works_count"].as_i64(),
        cited_by_count: item["cited_by_count"].as_i64(),
        h_index: item["summary_stats"]["h_index"].as_i64(),
        first_publication_year: years.iter().min().copied(),
        last_publication_year: years.iter().max().copied(),
        is_in_doaj: item["is_in_doaj"].as_bool(),
        subjects: item["topics"]
            .as_array()
            .map(|topics| {
                topics
                    .iter()
                    .filter_map(|t| t["display_name"].as_str().map(String::from))
                    .take(5)
                    .collect()
            })
            .unwrap_or_default(),
    }
}

impl OpenAlexBackend {
    pub const NAME: &'static str = "openalex_analyzer";

    pub fn new(db: Database, client: ApiClient, email: Option<String>, cache_ttl_hours: i64) -> Self {
        OpenAlexBackend {
            client,
            db,
            email,
            cache_ttl_hours,
        }
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    async fn sources(&self, mut params: Vec<(&str, String)>) -> Result<Vec<Value>, BackendError> {
        params.push(("per-page", PER_PAGE.to_string()));
        if let Some(email) = &self.email {
            params.push(("mailto", email.clone()));
        }
        let body = self.client.get_json(&["sources"], &params).await?;
        Ok(body
            .and_then(|b| b["results"].as_array().cloned())
            .unwrap_or_default())
    }

    /// Store what we learned so other backends can reuse it. Failures only cost
    /// a later re-fetch.
    async fn write_through(&self, item: &Value, query: &QueryInput, matched_issn: Option<&str>) {
        let source_issn = matched_issn
            .map(String::from)
            .or_else(|| item["issn_l"].as_str().map(String::from));

        let mut snapshots = vec![metrics_from_source(item, &query.normalized_name, source_issn.clone())];
        if source_issn.is_some() {
            snapshots.push(metrics_from_source(item, &query.normalized_name, None));
        }
        for metrics in &snapshots {
            if let Err(err) = self.db.cache_publication_metrics(metrics, self.cache_ttl_hours).await {
                warn!(target: TARGET_BACKEND, "openalex: could not cache metrics: {}", err);
            }
        }

        if let (Some(org_id), Some(org_name)) = (
            item["host_organization"].as_str(),
            item["host_organization_name"].as_str(),
        ) {
            let org = OrganizationRecord {
                organization_id: short_id(org_id).to_string(),
                name: org_name.to_string(),
                url: Some(org_id.to_string()),
                types: vec!["publisher".to_string()],
                ..Default::default()
            };
            if let Err(err) = self.db.cache_organization(&org, self.cache_ttl_hours).await {
                warn!(target: TARGET_BACKEND, "openalex: could not cache organization: {}", err);
            }
        }
    }

    async fn lookup(&self, query: &QueryInput) -> Result<BackendResult, BackendError> {
        let mut chain = FallbackChain::default();

        for candidate in chain.plan(query) {
            let (matched, matched_issn) = match candidate.strategy {
                FallbackStrategy::Issn | FallbackStrategy::Eissn => {
                    let results = self
                        .sources(vec![("filter", format!("issn:{}", candidate.value))])
                        .await?;
                    (
                        results.into_iter().next().map(|item| (item, MatchQuality::ExactIssn)),
                        Some(candidate.value.clone()),
                    )
                }
                FallbackStrategy::NormalizedName | FallbackStrategy::Aliases => {
                    let results = self.sources(vec![("search", candidate.value.clone())]).await?;
                    let is_alias = candidate.strategy == FallbackStrategy::Aliases;
                    (
                        best_title_match(&candidate.value, is_alias, &results, title_of)
                            .map(|(item, quality)| (item.clone(), quality)),
                        None,
                    )
                }
            };

            let Some((item, quality)) = matched else {
                chain.log_attempt(candidate.strategy, false, &candidate.value, None);
                continue;
            };
            let match_confidence = calculate_base_confidence(quality);
            chain.log_attempt(candidate.strategy, true, &candidate.value, Some(match_confidence));

            self.write_through(&item, query, matched_issn.as_deref()).await;

            let metrics = metrics_from_source(&item, &query.normalized_name, matched_issn);
            let (assessment, heuristic_confidence, reasons) = assess_metrics(&metrics);
            debug!(
                target: TARGET_BACKEND,
                "openalex: {} -> {:?} ({:.2})",
                query.normalized_name,
                assessment,
                heuristic_confidence
            );

            let data = json!({
                "openalex_id": item["id"],
                "title": metrics.display_name,
                "publisher": metrics.publisher,
                "issn": item["issn"],
                "publication_count": metrics.total_works,
                "cited_by_count": metrics.cited_by_count,
                "h_index": metrics.h_index,
                "first_publication_year": metrics.first_publication_year,
                "last_publication_year": metrics.last_publication_year,
                "is_in_doaj": metrics.is_in_doaj,
                "match_quality": quality,
                "reasons": reasons,
            });
            let mut sources = vec![format!("{}/sources", self.client.base_url())];
            if let Some(id) = item["id"].as_str() {
                sources.push(id.to_string());
            }

            return Ok(BackendResult::found(
                Self::NAME,
                EvidenceType::Heuristic,
                match_confidence * heuristic_confidence,
                assessment,
                data,
            )
            .with_sources(sources)
            .with_fallback_chain(chain.get_attempt_summary()));
        }

        Ok(BackendResult::not_found(Self::NAME, EvidenceType::Heuristic)
            .with_fallback_chain(chain.get_attempt_summary()))
    }
}

#[async_trait]
impl EvidenceBackend for OpenAlexBackend {
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
