use tracing::{debug, info, instrument, warn};

use super::core::{now_timestamp, Database};
use super::validation::{expiry_from_ttl, validate_query_hash};
use crate::db::Row;
use crate::error::Result;
use crate::types::AssessmentResult;
use crate::TARGET_DB;

/// Tables swept by `cleanup_expired_cache`
const TTL_TABLES: &[&str] = &[
    "assessment_cache",
    "key_value_cache",
    "publication_metrics",
    "retraction_cache",
    "retraction_statistics",
    "organization_cache",
];

impl Database {
    /// Store a finished assessment under its query hash, replacing any previous row.
    #[instrument(target = "db", level = "info", skip(self, raw_query, result))]
    pub async fn cache_assessment_result(
        &self,
        query_hash: &str,
        raw_query: &str,
        result: &AssessmentResult,
        ttl_hours: i64,
    ) -> Result<()> {
        validate_query_hash(query_hash)?;
        let now = now_timestamp();
        let expires_at = expiry_from_ttl(now, ttl_hours)?;
        self.store_assessment_row(query_hash, raw_query, result, now, expires_at)
            .await
    }

    pub(crate) async fn store_assessment_row(
        &self,
        query_hash: &str,
        raw_query: &str,
        result: &AssessmentResult,
        created_at: i64,
        expires_at: i64,
    ) -> Result<()> {
        let payload = serde_json::to_string(result)?;

        let mut write = self.begin_write().await?;
        sqlx::query(
            r#"
            INSERT INTO assessment_cache (query_hash, query_input, result, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(query_hash) DO UPDATE SET
                query_input = excluded.query_input,
                result = excluded.result,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(query_hash)
        .bind(raw_query)
        .bind(&payload)
        .bind(created_at)
        .bind(expires_at)
        .execute(&mut *write.tx)
        .await?;
        write.commit().await?;

        debug!(target: TARGET_DB, "Cached assessment {} until {}", query_hash, expires_at);
        Ok(())
    }

    /// Fetch a cached assessment that has not yet expired.
    #[instrument(target = "db", level = "info", skip(self))]
    pub async fn get_cached_assessment(&self, query_hash: &str) -> Result<Option<AssessmentResult>> {
        validate_query_hash(query_hash)?;

        let row = sqlx::query(
            r#"
            SELECT result FROM assessment_cache
            WHERE query_hash = ?1 AND expires_at > ?2
            "#,
        )
        .bind(query_hash)
        .bind(now_timestamp())
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => {
                let payload: String = row.get("result");
                match serde_json::from_str::<AssessmentResult>(&payload) {
                    Ok(result) => Ok(Some(result)),
                    Err(err) => {
                        // Unreadable rows are treated as misses and overwritten on the next write
                        warn!(target: TARGET_DB, "Discarding unreadable cached assessment {}: {}", query_hash, err);
                        Ok(None)
                    }
                }
            }
            None => Ok(None),
        }
    }

    /// Delete expired rows from every TTL-governed table, returning the total removed.
    #[instrument(target = "db", level = "info", skip(self))]
    pub async fn cleanup_expired_cache(&self) -> Result<u64> {
        let now = now_timestamp();
        let mut write = self.begin_write().await?;
        let mut removed = 0;

        for table in TTL_TABLES {
            let deleted = sqlx::query(&format!("DELETE FROM {} WHERE expires_at <= ?1", table))
                .bind(now)
                .execute(&mut *write.tx)
                .await?
                .rows_affected();
            if deleted > 0 {
                debug!(target: TARGET_DB, "Removed {} expired rows from {}", deleted, table);
            }
            removed += deleted;
        }
        write.commit().await?;

        info!(target: TARGET_DB, "Cache cleanup removed {} expired rows", removed);
        Ok(removed)
    }

    /// Drop every cached assessment regardless of expiry.
    #[instrument(target = "db", level = "info", skip(self))]
    pub async fn clear_assessment_cache(&self) -> Result<u64> {
        let mut write = self.begin_write().await?;
        let removed = sqlx::query("DELETE FROM assessment_cache")
            .execute(&mut *write.tx)
            .await?
            .rows_affected();
        write.commit().await?;

        info!(target: TARGET_DB, "Cleared {} cached assessments", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::core::test_support::temp_database;
    use crate::types::AssessmentType;

    const HASH: &str = "0123456789abcdef0123456789abcdef";

    fn sample_result() -> AssessmentResult {
        AssessmentResult {
            input_query: "Nature".to_string(),
            query_hash: HASH.to_string(),
            assessment: AssessmentType::Legitimate,
            confidence: 0.9,
            overall_score: 0.9,
            backend_results: Vec::new(),
            reasoning: vec!["Listed in scopus".to_string()],
            metadata: None,
            processing_time: 0.25,
            cached: false,
        }
    }

    #[tokio::test]
    async fn test_round_trip_and_replace() {
        let (db, _dir) = temp_database().await;
        assert!(db.get_cached_assessment(HASH).await.unwrap().is_none());

        db.cache_assessment_result(HASH, "Nature", &sample_result(), 24)
            .await
            .unwrap();
        let cached = db.get_cached_assessment(HASH).await.unwrap().unwrap();
        assert_eq!(cached.assessment, AssessmentType::Legitimate);
        assert_eq!(cached.reasoning, vec!["Listed in scopus".to_string()]);

        let mut updated = sample_result();
        updated.assessment = AssessmentType::Predatory;
        db.cache_assessment_result(HASH, "Nature", &updated, 24)
            .await
            .unwrap();
        let cached = db.get_cached_assessment(HASH).await.unwrap().unwrap();
        assert_eq!(cached.assessment, AssessmentType::Predatory);
        assert_eq!(db.clear_assessment_cache().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_malformed_hash_rejected_on_read_and_write() {
        let (db, _dir) = temp_database().await;
        for bad in ["", "abc", "0123456789ABCDEF0123456789ABCDEF", "z123456789abcdef0123456789abcdef"] {
            assert!(db.get_cached_assessment(bad).await.unwrap_err().is_validation());
            assert!(db
                .cache_assessment_result(bad, "x", &sample_result(), 24)
                .await
                .unwrap_err()
                .is_validation());
        }
    }

    #[tokio::test]
    async fn test_ttl_bounds_on_write() {
        let (db, _dir) = temp_database().await;
        for ttl in [0, -1, MAX_TTL + 1] {
            assert!(db
                .cache_assessment_result(HASH, "x", &sample_result(), ttl)
                .await
                .unwrap_err()
                .is_validation());
        }
        assert!(db.get_cached_assessment(HASH).await.unwrap().is_none());
    }

    const MAX_TTL: i64 = crate::db::MAX_TTL_HOURS;

    #[tokio::test]
    async fn test_expired_rows_are_invisible_and_cleanup_is_idempotent() {
        let (db, _dir) = temp_database().await;
        let now = now_timestamp();
        db.store_assessment_row(HASH, "Nature", &sample_result(), now - 7200, now - 3600)
            .await
            .unwrap();
        assert!(db.get_cached_assessment(HASH).await.unwrap().is_none());

        assert_eq!(db.cleanup_expired_cache().await.unwrap(), 1);
        assert_eq!(db.cleanup_expired_cache().await.unwrap(), 0);
    }
}
