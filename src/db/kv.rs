use tracing::{debug, instrument};

use super::core::{now_timestamp, Database};
use super::validation::{expiry_from_ttl, validate_cache_key};
use crate::error::Result;
use crate::TARGET_DB;

impl Database {
    /// Store a blob under `key` for `ttl_hours`, replacing any previous value.
    #[instrument(target = "db", level = "debug", skip(self, value))]
    pub async fn set_cached_value(&self, key: &str, value: &str, ttl_hours: i64) -> Result<()> {
        validate_cache_key(key)?;
        let now = now_timestamp();
        let expires_at = expiry_from_ttl(now, ttl_hours)?;
        self.store_cached_value(key, value, now, expires_at).await
    }

    pub(crate) async fn store_cached_value(
        &self,
        key: &str,
        value: &str,
        created_at: i64,
        expires_at: i64,
    ) -> Result<()> {
        let mut write = self.begin_write().await?;
        sqlx::query(
            r#"
            INSERT INTO key_value_cache (key, value, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(created_at)
        .bind(expires_at)
        .execute(&mut *write.tx)
        .await?;
        write.commit().await?;

        debug!(target: TARGET_DB, "Cached value for {}", key);
        Ok(())
    }

    /// Unexpired value for `key`, if any.
    #[instrument(target = "db", level = "debug", skip(self))]
    pub async fn get_cached_value(&self, key: &str) -> Result<Option<String>> {
        validate_cache_key(key)?;
        let value: Option<String> = sqlx::query_scalar(
            "SELECT value FROM key_value_cache WHERE key = ?1 AND expires_at > ?2",
        )
        .bind(key)
        .bind(now_timestamp())
        .fetch_optional(self.pool())
        .await?;
        Ok(value)
    }

    pub async fn delete_cached_value(&self, key: &str) -> Result<bool> {
        validate_cache_key(key)?;
        let mut write = self.begin_write().await?;
        let deleted = sqlx::query("DELETE FROM key_value_cache WHERE key = ?1")
            .bind(key)
            .execute(&mut *write.tx)
            .await?
            .rows_affected();
        write.commit().await?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::core::test_support::temp_database;
    use crate::db::MAX_TTL_HOURS;

    #[tokio::test]
    async fn test_set_get_replace_delete() {
        let (db, _dir) = temp_database().await;
        db.set_cached_value("backend:doaj:abc", "{\"a\":1}", 1).await.unwrap();
        assert_eq!(
            db.get_cached_value("backend:doaj:abc").await.unwrap().as_deref(),
            Some("{\"a\":1}")
        );
        db.set_cached_value("backend:doaj:abc", "{\"a\":2}", 1).await.unwrap();
        assert_eq!(
            db.get_cached_value("backend:doaj:abc").await.unwrap().as_deref(),
            Some("{\"a\":2}")
        );
        assert!(db.delete_cached_value("backend:doaj:abc").await.unwrap());
        assert!(!db.delete_cached_value("backend:doaj:abc").await.unwrap());
        assert!(db.get_cached_value("backend:doaj:abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_key_and_ttl_validation() {
        let (db, _dir) = temp_database().await;
        assert!(db.set_cached_value(" ", "v", 1).await.unwrap_err().is_validation());
        assert!(db.get_cached_value("").await.unwrap_err().is_validation());
        let long_key = "k".repeat(256);
        assert!(db.set_cached_value(&long_key, "v", 1).await.unwrap_err().is_validation());
        assert!(db.set_cached_value("k", "v", 0).await.unwrap_err().is_validation());
        assert!(db
            .set_cached_value("k", "v", MAX_TTL_HOURS + 1)
            .await
            .unwrap_err()
            .is_validation());
        assert!(db.get_cached_value("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_value_hidden() {
        let (db, _dir) = temp_database().await;
        let now = now_timestamp();
        db.store_cached_value("stale", "v", now - 10, now - 1).await.unwrap();
        assert!(db.get_cached_value("stale").await.unwrap().is_none());
        assert_eq!(db.cleanup_expired_cache().await.unwrap(), 1);
    }
}
