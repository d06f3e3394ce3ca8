//! Retraction-risk indicator over the locally stored retraction statistics.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use tracing::debug;

use super::cache::cached_lookup;
use super::{BackendError, EvidenceBackend};
use crate::confidence::{calculate_base_confidence, MatchQuality};
use crate::db::{Database, RetractionStatistics};
use crate::fallback::{FallbackChain, FallbackStrategy};
use crate::types::{BackendResult, EvidenceType, QueryInput};
use crate::TARGET_BACKEND;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    None,
    Low,
    Moderate,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RiskLevel::None => "none",
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        write!(f, "{}", label)
    }
}

/// Retractions as a percentage of published works
pub fn retraction_rate(total_retractions: i64, total_works: Option<i64>) -> Option<f64> {
    match total_works {
        Some(works) if works > 0 => Some(total_retractions as f64 / works as f64 * 100.0),
        _ => None,
    }
}

/// Tier from the venue's own retraction count.
pub fn risk_level(total_retractions: i64) -> RiskLevel {
    match total_retractions {
        total if total >= 21 => RiskLevel::Critical,
        total if total >= 11 => RiskLevel::High,
        total if total >= 6 => RiskLevel::Moderate,
        total if total >= 1 => RiskLevel::Low,
        _ => RiskLevel::None,
    }
}

pub struct RetractionWatchBackend {
    db: Database,
    cache_ttl_hours: i64,
}

impl RetractionWatchBackend {
    pub const NAME: &'static str = "retraction_watch";

    pub fn new(db: Database, cache_ttl_hours: i64) -> Self {
        RetractionWatchBackend { db, cache_ttl_hours }
    }

    async fn find(
        &self,
        strategy: FallbackStrategy,
        value: &str,
    ) -> Result<Option<RetractionStatistics>, BackendError> {
        let stats = match strategy {
            FallbackStrategy::Issn | FallbackStrategy::Eissn => {
                self.db.get_retraction_statistics(Some(value), None).await?
            }
            FallbackStrategy::NormalizedName | FallbackStrategy::Aliases => {
                self.db.get_retraction_statistics(None, Some(value)).await?
            }
        };
        Ok(stats)
    }

    async fn lookup(&self, query: &QueryInput) -> Result<BackendResult, BackendError> {
        let mut chain = FallbackChain::default();

        for candidate in chain.plan(query) {
            let Some(stats) = self.find(candidate.strategy, &candidate.value).await? else {
                chain.log_attempt(candidate.strategy, false, &candidate.value, None);
                continue;
            };

            let quality = match candidate.strategy {
                FallbackStrategy::Issn | FallbackStrategy::Eissn => MatchQuality::ExactIssn,
                FallbackStrategy::NormalizedName => MatchQuality::ExactName,
                FallbackStrategy::Aliases => MatchQuality::ExactAlias,
            };
            let confidence = calculate_base_confidence(quality);
            chain.log_attempt(candidate.strategy, true, &candidate.value, Some(confidence));

            let risk = risk_level(stats.total_retractions);
            // Metrics are written concurrently by other backends; they only annotate
            let issn = stats.issn.as_deref().or(query.issn());
            let metrics = self
                .db
                .get_publication_metrics(issn, Some(&query.normalized_name))
                .await?;
            let publication_count = metrics.and_then(|m| m.total_works);
            let rate = retraction_rate(stats.total_retractions, publication_count);

            debug!(
                target: TARGET_BACKEND,
                "retraction_watch: {} has {} retractions, risk {}",
                query.normalized_name,
                stats.total_retractions,
                risk
            );

            let data = json!({
                "risk_level": risk,
                "total_retractions": stats.total_retractions,
                "recent_retractions": stats.recent_retractions,
                "very_recent_retractions": stats.very_recent_retractions,
                "retraction_rate": rate,
                "publication_count": publication_count,
                "retraction_types": stats.retraction_types,
                "top_reasons": stats.top_reasons,
                "match_quality": quality,
            });

            return Ok(BackendResult::found(
                Self::NAME,
                EvidenceType::QualityIndicator,
                confidence,
                None,
                data,
            )
            .with_sources(vec!["list:retraction_watch".to_string()])
            .with_fallback_chain(chain.get_attempt_summary()));
        }

        Ok(BackendResult::not_found(Self::NAME, EvidenceType::QualityIndicator)
            .with_fallback_chain(chain.get_attempt_summary()))
    }
}

#[async_trait]
impl EvidenceBackend for RetractionWatchBackend {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn evidence_type(&self) -> EvidenceType {
        EvidenceType::QualityIndicator
    }

    fn cache_ttl_hours(&self) -> i64 {
        self.cache_ttl_hours
    }

    async fn query(&self, query: &QueryInput) -> BackendResult {
        cached_lookup(
            &self.db,
            Self::NAME,
            EvidenceType::QualityIndicator,
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
    use crate::db::PublicationMetrics;
    use crate::db::core::test_support::temp_database;
    use crate::normalizer::normalize;
    use crate::types::BackendStatus;

    #[test]
    fn test_risk_tiers() {
        assert_eq!(risk_level(0), RiskLevel::None);
        assert_eq!(risk_level(2), RiskLevel::Low);
        assert_eq!(risk_level(6), RiskLevel::Moderate);
        assert_eq!(risk_level(11), RiskLevel::High);
        assert_eq!(risk_level(25), RiskLevel::Critical);
        assert_eq!(retraction_rate(5, Some(0)), None);
        assert_eq!(retraction_rate(5, None), None);
    }

    #[tokio::test]
    async fn test_publication_metrics_annotate_without_changing_tier() {
        let (db, _dir) = temp_database().await;
        db.upsert_retraction_statistics(
            &RetractionStatistics {
                normalized_name: "Journal of Stuff".to_string(),
                issn: Some("1234-5679".to_string()),
                total_retractions: 7,
                ..Default::default()
            },
            24,
        )
        .await
        .unwrap();
        db.cache_publication_metrics(
            &PublicationMetrics {
                normalized_name: "Journal of Stuff".to_string(),
                issn: Some("1234-5679".to_string()),
                total_works: Some(100),
                ..Default::default()
            },
            24,
        )
        .await
        .unwrap();

        let backend = RetractionWatchBackend::new(db, 24);
        let result = backend
            .query(&normalize("Journal of Stuff ISSN 1234-5679").unwrap())
            .await;
        assert_eq!(result.status, BackendStatus::Found);
        assert_eq!(result.assessment, None);
        assert_eq!(result.data["risk_level"], "moderate");
        assert_eq!(result.data["publication_count"], 100);
        let rate = result.data["retraction_rate"].as_f64().unwrap();
        assert!((rate - 7.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_name_match_without_metrics_uses_counts() {
        let (db, _dir) = temp_database().await;
        db.upsert_retraction_statistics(
            &RetractionStatistics {
                normalized_name: "Journal of Stuff".to_string(),
                total_retractions: 7,
                ..Default::default()
            },
            24,
        )
        .await
        .unwrap();

        let backend = RetractionWatchBackend::new(db, 24);
        let result = backend.query(&normalize("journal of stuff").unwrap()).await;
        assert_eq!(result.data["risk_level"], "moderate");
        assert_eq!(result.confidence, 0.95);

        let missing = backend.query(&normalize("Nature").unwrap()).await;
        assert_eq!(missing.status, BackendStatus::NotFound);
    }
}
