//! Backends answering from a locally stored membership list.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::cache::cached_lookup;
use super::{BackendError, EvidenceBackend};
use crate::confidence::{calculate_base_confidence, MatchQuality};
use crate::db::{Database, JournalEntry, JournalSearch};
use crate::fallback::{FallbackChain, FallbackStrategy};
use crate::types::{AssessmentType, BackendResult, EvidenceType, QueryInput};
use crate::TARGET_BACKEND;

/// Checks whether a venue appears on one registered source's list.
pub struct ListBackend {
    name: String,
    source_name: String,
    evidence_type: EvidenceType,
    db: Database,
    cache_ttl_hours: i64,
}

impl ListBackend {
    pub fn new(
        name: &str,
        source_name: &str,
        evidence_type: EvidenceType,
        db: Database,
        cache_ttl_hours: i64,
    ) -> Self {
        ListBackend {
            name: name.to_string(),
            source_name: source_name.to_string(),
            evidence_type,
            db,
            cache_ttl_hours,
        }
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    async fn find(&self, strategy: FallbackStrategy, value: &str) -> Result<Vec<JournalEntry>, BackendError> {
        let search = match strategy {
            FallbackStrategy::Issn | FallbackStrategy::Eissn => JournalSearch {
                issn: Some(value),
                source_name: Some(&self.source_name),
                ..Default::default()
            },
            FallbackStrategy::NormalizedName | FallbackStrategy::Aliases => JournalSearch {
                normalized_name: Some(value),
                source_name: Some(&self.source_name),
                ..Default::default()
            },
        };
        Ok(self.db.search_journals(&search).await?)
    }

    async fn lookup(&self, query: &QueryInput) -> Result<BackendResult, BackendError> {
        let mut chain = FallbackChain::default();

        for candidate in chain.plan(query) {
            let entries = self.find(candidate.strategy, &candidate.value).await?;
            let Some(entry) = entries.into_iter().next() else {
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

            debug!(
                target: TARGET_BACKEND,
                "{}: '{}' matched {} via {}",
                self.name,
                query.normalized_name,
                entry.journal_name,
                candidate.strategy
            );

            let assessment = match entry.assessment {
                AssessmentType::Unknown => None,
                other => Some(other),
            };
            let data = json!({
                "source": self.source_name,
                "matched_name": entry.journal_name,
                "issn": entry.issn,
                "eissn": entry.eissn,
                "publisher": entry.publisher,
                "match_quality": quality,
                "matched_by": candidate.strategy,
                "metadata": entry.metadata,
            });
            return Ok(
                BackendResult::found(&self.name, self.evidence_type, confidence, assessment, data)
                    .with_sources(vec![format!("list:{}", self.source_name)])
                    .with_fallback_chain(chain.get_attempt_summary()),
            );
        }

        Ok(BackendResult::not_found(&self.name, self.evidence_type)
            .with_fallback_chain(chain.get_attempt_summary()))
    }
}

#[async_trait]
impl EvidenceBackend for ListBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn evidence_type(&self) -> EvidenceType {
        self.evidence_type
    }

    fn cache_ttl_hours(&self) -> i64 {
        self.cache_ttl_hours
    }

    async fn query(&self, query: &QueryInput) -> BackendResult {
        cached_lookup(
            &self.db,
            &self.name,
            self.evidence_type,
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
    use crate::types::{BackendStatus, JournalRecord};

    async fn bealls() -> (ListBackend, tempfile::TempDir) {
        let (db, dir) = temp_database().await;
        db.register_data_source("bealls", "Beall's List", AssessmentType::Predatory, None)
            .await
            .unwrap();
        db.add_journal_entry(
            "bealls",
            AssessmentType::Predatory,
            &JournalRecord::new("Journal of Stuff", "Journal of Stuff")
                .with_issn("1234-5679")
                .with_publisher("Shady Press"),
        )
        .await
        .unwrap();
        db.add_journal_entry(
            "bealls",
            AssessmentType::Predatory,
            &JournalRecord::new("Conference on Widgets", "Conference on Widgets"),
        )
        .await
        .unwrap();
        (
            ListBackend::new("bealls", "bealls", EvidenceType::PredatoryList, db, 24),
            dir,
        )
    }

    #[tokio::test]
    async fn test_issn_match_is_exact() {
        let (backend, _dir) = bealls().await;
        let query = normalize("Totally Different Title ISSN 1234-5679").unwrap();
        let result = backend.query(&query).await;
        assert_eq!(result.status, BackendStatus::Found);
        assert_eq!(result.assessment, Some(AssessmentType::Predatory));
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.data["matched_by"], "issn");
        assert_eq!(result.fallback_chain.as_deref(), Some("issn(success, conf=1.00)"));
    }

    #[tokio::test]
    async fn test_name_and_alias_fallbacks() {
        let (backend, _dir) = bealls().await;
        let by_name = backend.query(&normalize("journal of stuff").unwrap()).await;
        assert_eq!(by_name.confidence, 0.95);
        assert_eq!(by_name.data["match_quality"], "EXACT_NAME");

        let by_alias = backend
            .query(&normalize("2019 Proceedings of the Conference on Widgets").unwrap())
            .await;
        assert_eq!(by_alias.status, BackendStatus::Found);
        assert_eq!(by_alias.confidence, 0.90);
        assert_eq!(
            by_alias.fallback_chain.as_deref(),
            Some("normalized_name(fail) → aliases(fail) → aliases(success, conf=0.90)")
        );
    }

    #[tokio::test]
    async fn test_not_found_then_cached() {
        let (backend, _dir) = bealls().await;
        let query = normalize("Nature").unwrap();
        let first = backend.query(&query).await;
        assert_eq!(first.status, BackendStatus::NotFound);
        assert!(!first.cached);
        let second = backend.query(&query).await;
        assert_eq!(second.status, BackendStatus::NotFound);
        assert!(second.cached);
    }
}
