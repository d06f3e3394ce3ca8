//! Cache-then-lookup wrapper shared by every backend.

use std::future::Future;
use std::time::Instant;
use tracing::{debug, warn};

use super::BackendError;
use crate::db::Database;
use crate::types::{BackendResult, EvidenceType, QueryInput};
use crate::TARGET_BACKEND;

/// Key under which a backend's result for `query` is cached
pub fn backend_cache_key(backend_name: &str, query: &QueryInput) -> String {
    format!("backend:{}:{}", backend_name, query.query_hash())
}

/// Serve `query` from the key-value cache, or run `lookup` and cache its
/// outcome when it is definitive (FOUND / NOT_FOUND).
///
/// Lookup errors turn into ERROR results and rate limits into RATE_LIMITED;
/// neither is cached. Cache read or write failures are logged and otherwise
/// ignored so a broken cache only costs latency.
pub async fn cached_lookup<F, Fut>(
    db: &Database,
    backend_name: &str,
    evidence_type: EvidenceType,
    ttl_hours: i64,
    query: &QueryInput,
    lookup: F,
) -> BackendResult
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<BackendResult, BackendError>>,
{
    let started = Instant::now();
    let key = backend_cache_key(backend_name, query);

    match db.get_cached_value(&key).await {
        Ok(Some(payload)) => match serde_json::from_str::<BackendResult>(&payload) {
            Ok(mut result) => {
                result.cached = true;
                result.response_time = started.elapsed().as_secs_f64();
                debug!(target: TARGET_BACKEND, "{}: cache hit for {}", backend_name, query.normalized_name);
                return result;
            }
            Err(err) => {
                warn!(target: TARGET_BACKEND, "{}: ignoring unreadable cache entry: {}", backend_name, err)
            }
        },
        Ok(None) => {}
        Err(err) => warn!(target: TARGET_BACKEND, "{}: cache read failed: {}", backend_name, err),
    }

    let mut result = match lookup().await {
        Ok(result) => result,
        Err(BackendError::RateLimited { retry_after }) => {
            warn!(target: TARGET_BACKEND, "{}: rate limited (retry after {:?})", backend_name, retry_after);
            BackendResult::rate_limited(backend_name, evidence_type, retry_after)
        }
        Err(err) => {
            warn!(target: TARGET_BACKEND, "{}: lookup failed: {}", backend_name, err);
            BackendResult::error(backend_name, evidence_type, err.to_string())
        }
    };
    result.cached = false;

    if result.is_cacheable() {
        match serde_json::to_string(&result) {
            Ok(payload) => {
                if let Err(err) = db.set_cached_value(&key, &payload, ttl_hours).await {
                    warn!(target: TARGET_BACKEND, "{}: cache write failed: {}", backend_name, err);
                }
            }
            Err(err) => warn!(target: TARGET_BACKEND, "{}: result not serializable: {}", backend_name, err),
        }
    }

    result.response_time = started.elapsed().as_secs_f64();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::core::test_support::temp_database;
    use crate::normalizer::normalize;
    use crate::types::{AssessmentType, BackendStatus};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn slow_found() -> Result<BackendResult, BackendError> {
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok(BackendResult::found(
            "test",
            EvidenceType::PredatoryList,
            0.95,
            Some(AssessmentType::Predatory),
            json!({"matched": "Journal of Stuff"}),
        ))
    }

    #[tokio::test]
    async fn test_second_query_served_from_cache_and_faster() {
        let (db, _dir) = temp_database().await;
        let query = normalize("Journal of Stuff").unwrap();

        let first = cached_lookup(&db, "test", EvidenceType::PredatoryList, 24, &query, slow_found).await;
        let second = cached_lookup(&db, "test", EvidenceType::PredatoryList, 24, &query, slow_found).await;

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(second.assessment, Some(AssessmentType::Predatory));
        assert!(second.response_time < first.response_time);
    }

    #[tokio::test]
    async fn test_not_found_is_cached() {
        let (db, _dir) = temp_database().await;
        let query = normalize("Unknown Venue").unwrap();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let result = cached_lookup(&db, "test", EvidenceType::LegitimateList, 24, &query, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(BackendResult::not_found("test", EvidenceType::LegitimateList))
            })
            .await;
            assert_eq!(result.status, BackendStatus::NotFound);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_and_rate_limits_are_not_cached() {
        let (db, _dir) = temp_database().await;
        let query = normalize("Flaky Venue").unwrap();
        let calls = AtomicUsize::new(0);

        let result = cached_lookup(&db, "test", EvidenceType::Heuristic, 24, &query, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::Parse("bad payload".to_string()))
        })
        .await;
        assert_eq!(result.status, BackendStatus::Error);
        assert!(result.error_message.unwrap().contains("bad payload"));

        let result = cached_lookup(&db, "test", EvidenceType::Heuristic, 24, &query, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::RateLimited { retry_after: Some(7) })
        })
        .await;
        assert_eq!(result.status, BackendStatus::RateLimited);
        assert_eq!(result.retry_after, Some(7));

        let key = backend_cache_key("test", &query);
        assert!(db.get_cached_value(&key).await.unwrap().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
