//! Concurrent fan-out of one query to every enabled backend.

use futures::future::{self, join_all, BoxFuture, FutureExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

use crate::aggregator::Aggregator;
use crate::backends::BackendRegistry;
use crate::config::{AppConfig, BackendSettings};
use crate::types::{AssessmentResult, BackendResult, EvidenceType, QueryInput};
use crate::validation::CrossValidationRegistry;
use crate::TARGET_ASSESSMENT;

pub struct Dispatcher {
    registry: Arc<BackendRegistry>,
    backends: Vec<BackendSettings>,
    aggregator: Aggregator,
}

impl Dispatcher {
    pub fn new(registry: Arc<BackendRegistry>, backends: Vec<BackendSettings>, aggregator: Aggregator) -> Self {
        Dispatcher {
            registry,
            backends,
            aggregator,
        }
    }

    pub fn from_config(registry: Arc<BackendRegistry>, config: &AppConfig) -> Self {
        let aggregator =
            Aggregator::from_settings(&config.backends, CrossValidationRegistry::with_defaults());
        Self::new(registry, config.backends.clone(), aggregator)
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Query every enabled backend at once, each under its own timeout, and
    /// aggregate whatever comes back. Backends that cannot be constructed
    /// are reported as ERROR results.
    pub async fn assess_journal(&self, query: &QueryInput) -> AssessmentResult {
        let started = Instant::now();

        let pending: Vec<BoxFuture<'_, BackendResult>> = self
            .backends
            .iter()
            .filter(|settings| settings.enabled)
            .map(|settings| match self.registry.get_backend(&settings.name) {
                Ok(backend) => {
                    let timeout = settings.timeout;
                    async move { backend.query_with_timeout(query, timeout).await }.boxed()
                }
                Err(err) => {
                    error!(target: TARGET_ASSESSMENT, "Could not create backend {}: {}", settings.name, err);
                    future::ready(BackendResult::error(
                        &settings.name,
                        EvidenceType::Heuristic,
                        format!("Backend unavailable: {}", err),
                    ))
                    .boxed()
                }
            })
            .collect();

        debug!(
            target: TARGET_ASSESSMENT,
            "Dispatching '{}' to {} backends",
            query.normalized_name,
            pending.len()
        );
        let results = join_all(pending).await;

        let mut assessment = self.aggregator.aggregate(query, results);
        assessment.processing_time = started.elapsed().as_secs_f64();
        assessment
    }
}
