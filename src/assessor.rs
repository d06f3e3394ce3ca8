//! Public entry point: raw venue text in, verdict out.

use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

use crate::backends::BackendRegistry;
use crate::config::AppConfig;
use crate::db::Database;
use crate::dispatcher::Dispatcher;
use crate::error::{Result, ThemisError};
use crate::normalizer::InputNormalizer;
use crate::types::{AssessmentResult, BackendStatus};
use crate::TARGET_ASSESSMENT;

pub struct Assessor {
    db: Database,
    normalizer: InputNormalizer,
    dispatcher: Dispatcher,
    assessment_ttl_hours: i64,
}

impl Assessor {
    /// Open the database named in `config` and wire up every configured backend.
    ///
    /// Fails when an enabled backend has no registered factory.
    pub async fn new(config: &AppConfig) -> Result<Self> {
        config.validate()?;
        let db = Database::new(&config.database_path).await?;
        let registry = BackendRegistry::with_defaults(db.clone(), config);

        let known = registry.get_backend_names();
        if let Some(unknown) = config
            .enabled_backends()
            .find(|settings| !known.contains(&settings.name))
        {
            return Err(ThemisError::UnknownBackend(unknown.name.clone()));
        }

        let dispatcher = Dispatcher::from_config(Arc::new(registry), config);
        Ok(Self::from_parts(db, dispatcher, config.assessment_ttl_hours))
    }

    pub fn from_parts(db: Database, dispatcher: Dispatcher, assessment_ttl_hours: i64) -> Self {
        Assessor {
            db,
            normalizer: InputNormalizer::default(),
            dispatcher,
            assessment_ttl_hours,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Assess one venue. Only invalid input is reported as an error; backend
    /// and cache trouble degrade the answer instead.
    #[instrument(target = "assessment", level = "info", skip(self))]
    pub async fn assess(&self, raw: &str) -> Result<AssessmentResult> {
        let started = Instant::now();
        let query = self.normalizer.normalize(raw)?;
        let query_hash = query.query_hash();

        match self.db.get_cached_assessment(&query_hash).await {
            Ok(Some(mut cached)) => {
                cached.cached = true;
                cached.processing_time = started.elapsed().as_secs_f64();
                info!(target: TARGET_ASSESSMENT, "Serving cached assessment for '{}'", query.normalized_name);
                return Ok(cached);
            }
            Ok(None) => {}
            Err(err) => warn!(target: TARGET_ASSESSMENT, "Assessment cache read failed: {}", err),
        }

        let result = self.dispatcher.assess_journal(&query).await;

        // Any failed backend must be retried on the next call
        let degraded = result
            .backend_results
            .iter()
            .any(|r| matches!(r.status, BackendStatus::Error | BackendStatus::RateLimited));
        if degraded {
            info!(target: TARGET_ASSESSMENT, "Not caching degraded assessment for '{}'", query.normalized_name);
        } else if let Err(err) = self
            .db
            .cache_assessment_result(&query_hash, raw, &result, self.assessment_ttl_hours)
            .await
        {
            warn!(target: TARGET_ASSESSMENT, "Could not cache assessment: {}", err);
        }

        Ok(result)
    }

    /// Sweep expired rows from every cache table.
    pub async fn cleanup(&self) -> Result<u64> {
        self.db.cleanup_expired_cache().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::Aggregator;
    use crate::backends::test_support::StaticBackend;
    use crate::backends::{BackendParams, EvidenceBackend};
    use crate::config::BackendSettings;
    use crate::db::core::test_support::temp_database;
    use crate::types::{AssessmentType, BackendResult, EvidenceType, JournalRecord};
    use crate::validation::CrossValidationRegistry;
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[tokio::test]
    async fn test_issn_on_predatory_list() {
        let (db, _dir) = temp_database().await;
        db.register_data_source("bealls", "Beall's List", AssessmentType::Predatory, None)
            .await
            .unwrap();
        db.add_journal_entry(
            "bealls",
            AssessmentType::Predatory,
            &JournalRecord::new("Journal of Stuff", "Journal of Stuff").with_issn("1234-5679"),
        )
        .await
        .unwrap();

        let config = AppConfig {
            backends: vec![
                BackendSettings::new("bealls", 1.0, 5),
                BackendSettings::new("scopus", 1.0, 5),
                BackendSettings::new("retraction_watch", 0.5, 5),
            ],
            ..Default::default()
        };
        let registry = Arc::new(BackendRegistry::with_defaults(db.clone(), &config));
        let assessor = Assessor::from_parts(db, Dispatcher::from_config(registry, &config), 24);

        let verdict = assessor.assess("Some Other Title (ISSN 1234-5679)").await.unwrap();
        assert_eq!(verdict.assessment, AssessmentType::Predatory);
        assert!(verdict.confidence > 0.9);
        assert!(verdict.overall_score < 0.0);
        assert_eq!(verdict.backend_results.len(), 3);
    }

    #[tokio::test]
    async fn test_second_assessment_is_cached_and_faster() {
        let (db, _dir) = temp_database().await;
        let mut registry = BackendRegistry::new();
        let slow: Arc<dyn EvidenceBackend> = Arc::new(
            StaticBackend::found("slow", EvidenceType::LegitimateList, AssessmentType::Legitimate, 0.95)
                .with_delay(Duration::from_millis(50)),
        );
        registry.register_factory("slow", move |_: &BackendParams| Ok(slow.clone()), BackendParams::new());
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            vec![BackendSettings::new("slow", 1.0, 5)],
            Aggregator::new(HashMap::new(), CrossValidationRegistry::new()),
        );
        let assessor = Assessor::from_parts(db, dispatcher, 24);

        let first = assessor.assess("Nature").await.unwrap();
        let second = assessor.assess("  Nature ").await.unwrap();
        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(second.assessment, AssessmentType::Legitimate);
        assert!(second.processing_time < first.processing_time);
    }

    #[tokio::test]
    async fn test_total_failure_is_not_cached() {
        let (db, _dir) = temp_database().await;
        let mut registry = BackendRegistry::new();
        let broken: Arc<dyn EvidenceBackend> =
            Arc::new(StaticBackend::failing("broken", EvidenceType::PredatoryList));
        registry.register_factory("broken", move |_: &BackendParams| Ok(broken.clone()), BackendParams::new());
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            vec![BackendSettings::new("broken", 1.0, 5)],
            Aggregator::new(HashMap::new(), CrossValidationRegistry::new()),
        );
        let assessor = Assessor::from_parts(db, dispatcher, 24);

        let first = assessor.assess("Nature").await.unwrap();
        assert_eq!(first.assessment, AssessmentType::Unknown);
        assert_eq!(first.confidence, 0.0);
        assert!(first.processing_time > 0.0);
        let second = assessor.assess("Nature").await.unwrap();
        assert!(!second.cached);
    }

    #[tokio::test]
    async fn test_partial_failure_is_retried() {
        let (db, _dir) = temp_database().await;
        let flaky = Arc::new(StaticBackend::failing("flaky", EvidenceType::LegitimateList));
        let miss: Arc<dyn EvidenceBackend> = Arc::new(StaticBackend::with_result(
            "miss",
            EvidenceType::PredatoryList,
            BackendResult::not_found("miss", EvidenceType::PredatoryList),
        ));
        let mut registry = BackendRegistry::new();
        let shared: Arc<dyn EvidenceBackend> = flaky.clone();
        registry.register_factory("flaky", move |_: &BackendParams| Ok(shared.clone()), BackendParams::new());
        registry.register_factory("miss", move |_: &BackendParams| Ok(miss.clone()), BackendParams::new());
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            vec![BackendSettings::new("flaky", 1.0, 5), BackendSettings::new("miss", 1.0, 5)],
            Aggregator::new(HashMap::new(), CrossValidationRegistry::new()),
        );
        let assessor = Assessor::from_parts(db, dispatcher, 24);

        assessor.assess("Nature").await.unwrap();
        let second = assessor.assess("Nature").await.unwrap();
        assert!(!second.cached);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_input_is_validation_error() {
        let (db, _dir) = temp_database().await;
        let dispatcher = Dispatcher::new(
            Arc::new(BackendRegistry::new()),
            Vec::new(),
            Aggregator::new(HashMap::new(), CrossValidationRegistry::new()),
        );
        let assessor = Assessor::from_parts(db, dispatcher, 24);
        let err = assessor.assess("   ").await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_unknown_configured_backend_is_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = AppConfig {
            database_path: dir.path().join("themis.db").to_string_lossy().into_owned(),
            backends: vec![BackendSettings::new("nonexistent", 1.0, 5)],
            ..Default::default()
        };
        assert!(matches!(
            Assessor::new(&config).await,
            Err(ThemisError::UnknownBackend(name)) if name == "nonexistent"
        ));
    }
}
