//! Evidence backends: one per external source, plus the composite cross-checker.

use async_trait::async_trait;
use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

use crate::confidence::{calculate_base_confidence, classify_name_match, MatchQuality};
use crate::config::DEFAULT_CACHE_TTL_HOURS;
use crate::error::ThemisError;
use crate::types::{BackendResult, EvidenceType, QueryInput};
use crate::TARGET_BACKEND;

pub mod cache;
pub mod crossref;
pub mod cross_validator;
pub mod doaj;
pub mod http;
pub mod list;
pub mod openalex;
pub mod registry;
pub mod retraction;

pub use self::registry::{BackendParams, BackendRegistry};

/// Failures inside a backend. These never leave the backend: `cached_lookup`
/// folds them into an ERROR or RATE_LIMITED result.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{source_name} returned HTTP {status}: {message}")]
    Status {
        source_name: String,
        status: u16,
        message: String,
    },

    #[error("Rate limited")]
    RateLimited { retry_after: Option<u64> },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unexpected response: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] ThemisError),
}

/// A pluggable source of opinion about a venue
#[async_trait]
pub trait EvidenceBackend: Send + Sync {
    fn name(&self) -> &str;

    fn evidence_type(&self) -> EvidenceType;

    /// Hours a FOUND / NOT_FOUND result from this backend stays cached
    fn cache_ttl_hours(&self) -> i64 {
        DEFAULT_CACHE_TTL_HOURS
    }

    /// Resolve `query`. Never fails: problems are reported through the status.
    async fn query(&self, query: &QueryInput) -> BackendResult;

    /// `query` bounded by `timeout`; an elapsed timeout yields an ERROR result
    /// and drops the in-flight lookup.
    async fn query_with_timeout(&self, query: &QueryInput, timeout: Duration) -> BackendResult {
        let started = Instant::now();
        match tokio::time::timeout(timeout, self.query(query)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    target: TARGET_BACKEND,
                    "Backend {} timed out after {:.1}s",
                    self.name(),
                    timeout.as_secs_f64()
                );
                BackendResult::error(
                    self.name(),
                    self.evidence_type(),
                    format!("Timed out after {:.1}s", timeout.as_secs_f64()),
                )
                .with_response_time(started.elapsed().as_secs_f64())
            }
        }
    }
}

/// Pick the item whose title best matches `value`, ignoring non-matches.
pub(crate) fn best_title_match<'a>(
    value: &str,
    is_alias: bool,
    items: &'a [Value],
    title_of: impl Fn(&Value) -> Option<&str>,
) -> Option<(&'a Value, MatchQuality)> {
    items
        .iter()
        .filter_map(|item| {
            let title = title_of(item)?;
            match classify_name_match(value, title, is_alias) {
                MatchQuality::NoMatch => None,
                quality => Some((item, quality)),
            }
        })
        .max_by(|a, b| {
            calculate_base_confidence(a.1)
                .partial_cmp(&calculate_base_confidence(b.1))
                .unwrap_or(std::cmp::Ordering::Equal)
                // Prefer the earlier (higher ranked) item on ties
                .then(std::cmp::Ordering::Greater)
        })
}
