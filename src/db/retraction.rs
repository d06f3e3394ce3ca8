use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

use super::core::{now_timestamp, Database};
use super::metrics::metrics_key;
use super::validation::{expiry_from_ttl, require_non_empty, validate_cache_key};
use crate::error::Result;
use crate::TARGET_DB;

/// Retraction status of a single article
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetractionRecord {
    pub doi: String,
    pub is_retracted: bool,
    #[serde(default)]
    pub retraction_date: Option<String>,
    #[serde(default)]
    pub retraction_nature: Option<String>,
    #[serde(default)]
    pub journal: Option<String>,
    #[serde(default)]
    pub reasons: Vec<String>,
}

/// Aggregate retraction counts for one venue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetractionStatistics {
    pub normalized_name: String,
    #[serde(default)]
    pub issn: Option<String>,
    #[serde(default)]
    pub journal_name: Option<String>,
    pub total_retractions: i64,
    /// Retractions in the last two years
    #[serde(default)]
    pub recent_retractions: i64,
    /// Retractions in the last year
    #[serde(default)]
    pub very_recent_retractions: i64,
    #[serde(default)]
    pub retraction_types: BTreeMap<String, i64>,
    #[serde(default)]
    pub top_reasons: Vec<String>,
    #[serde(default)]
    pub publishers: Vec<String>,
    #[serde(default)]
    pub first_retraction_year: Option<i32>,
    #[serde(default)]
    pub last_retraction_year: Option<i32>,
}

fn normalize_doi(doi: &str) -> String {
    let doi = doi.trim().to_lowercase();
    for prefix in ["https://doi.org/", "http://doi.org/", "https://dx.doi.org/", "doi:"] {
        if let Some(stripped) = doi.strip_prefix(prefix) {
            return stripped.trim().to_string();
        }
    }
    doi
}

impl Database {
    #[instrument(target = "db", level = "debug", skip(self, record), fields(doi = %record.doi))]
    pub async fn cache_retraction(&self, record: &RetractionRecord, ttl_hours: i64) -> Result<()> {
        let doi = normalize_doi(&record.doi);
        validate_cache_key(&doi)?;
        let now = now_timestamp();
        let expires_at = expiry_from_ttl(now, ttl_hours)?;
        let payload = serde_json::to_string(record)?;

        let mut write = self.begin_write().await?;
        sqlx::query(
            r#"
            INSERT INTO retraction_cache (doi, is_retracted, data, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(doi) DO UPDATE SET
                is_retracted = excluded.is_retracted,
                data = excluded.data,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&doi)
        .bind(record.is_retracted)
        .bind(&payload)
        .bind(now)
        .bind(expires_at)
        .execute(&mut *write.tx)
        .await?;
        write.commit().await?;
        Ok(())
    }

    /// Cached status for a DOI; URL and `doi:` prefixes are ignored.
    pub async fn get_cached_retraction(&self, doi: &str) -> Result<Option<RetractionRecord>> {
        let doi = normalize_doi(doi);
        validate_cache_key(&doi)?;
        let payload: Option<String> = sqlx::query_scalar(
            "SELECT data FROM retraction_cache WHERE doi = ?1 AND expires_at > ?2",
        )
        .bind(&doi)
        .bind(now_timestamp())
        .fetch_optional(self.pool())
        .await?;

        Ok(payload.and_then(|p| match serde_json::from_str(&p) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(target: TARGET_DB, "Unreadable retraction row for {}: {}", doi, err);
                None
            }
        }))
    }

    #[instrument(target = "db", level = "debug", skip(self, stats), fields(journal = %stats.normalized_name))]
    pub async fn upsert_retraction_statistics(
        &self,
        stats: &RetractionStatistics,
        ttl_hours: i64,
    ) -> Result<()> {
        require_non_empty("normalized_name", &stats.normalized_name)?;
        let now = now_timestamp();
        let expires_at = expiry_from_ttl(now, ttl_hours)?;
        let payload = serde_json::to_string(stats)?;
        let key = metrics_key(stats.issn.as_deref(), &stats.normalized_name);

        let mut write = self.begin_write().await?;
        sqlx::query(
            r#"
            INSERT INTO retraction_statistics (stats_key, issn, normalized_name, data, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(stats_key) DO UPDATE SET
                issn = excluded.issn,
                normalized_name = excluded.normalized_name,
                data = excluded.data,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&key)
        .bind(stats.issn.as_deref())
        .bind(stats.normalized_name.trim().to_lowercase())
        .bind(&payload)
        .bind(now)
        .bind(expires_at)
        .execute(&mut *write.tx)
        .await?;
        write.commit().await?;

        debug!(target: TARGET_DB, "Stored retraction statistics under {}", key);
        Ok(())
    }

    /// Statistics by ISSN, falling back to a case-insensitive name match.
    pub async fn get_retraction_statistics(
        &self,
        issn: Option<&str>,
        normalized_name: Option<&str>,
    ) -> Result<Option<RetractionStatistics>> {
        let now = now_timestamp();

        if let Some(issn) = issn.filter(|i| !i.trim().is_empty()) {
            let payload: Option<String> = sqlx::query_scalar(
                "SELECT data FROM retraction_statistics WHERE (stats_key = ?1 OR issn = ?1) AND expires_at > ?2",
            )
            .bind(metrics_key(Some(issn), ""))
            .bind(now)
            .fetch_optional(self.pool())
            .await?;
            if let Some(payload) = payload {
                return Ok(serde_json::from_str(&payload).ok());
            }
        }

        if let Some(name) = normalized_name.filter(|n| !n.trim().is_empty()) {
            let payload: Option<String> = sqlx::query_scalar(
                r#"
                SELECT data FROM retraction_statistics
                WHERE normalized_name = ?1 COLLATE NOCASE AND expires_at > ?2
                ORDER BY created_at DESC LIMIT 1
                "#,
            )
            .bind(name.trim())
            .bind(now)
            .fetch_optional(self.pool())
            .await?;
            if let Some(payload) = payload {
                return Ok(serde_json::from_str(&payload).ok());
            }
        }

        Ok(None)
    }
}
