use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::core::{now_timestamp, Database};
use super::validation::{expiry_from_ttl, require_non_empty};
use crate::error::Result;
use crate::TARGET_DB;

/// Publication-volume snapshot for one venue, as reported by a bibliographic index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublicationMetrics {
    pub normalized_name: String,
    #[serde(default)]
    pub issn: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub total_works: Option<i64>,
    #[serde(default)]
    pub cited_by_count: Option<i64>,
    #[serde(default)]
    pub h_index: Option<i64>,
    #[serde(default)]
    pub first_publication_year: Option<i32>,
    #[serde(default)]
    pub last_publication_year: Option<i32>,
    #[serde(default)]
    pub is_in_doaj: Option<bool>,
    #[serde(default)]
    pub subjects: Vec<String>,
}

impl PublicationMetrics {
    /// Natural key: the ISSN when known, otherwise `name:<normalized name>`.
    pub fn metrics_key(&self) -> String {
        metrics_key(self.issn.as_deref(), &self.normalized_name)
    }
}

pub(crate) fn metrics_key(issn: Option<&str>, normalized_name: &str) -> String {
    match issn.map(str::trim).filter(|i| !i.is_empty()) {
        Some(issn) => issn.to_uppercase(),
        None => format!("name:{}", normalized_name.trim().to_lowercase()),
    }
}

impl Database {
    #[instrument(target = "db", level = "debug", skip(self, metrics), fields(key = %metrics.metrics_key()))]
    pub async fn cache_publication_metrics(
        &self,
        metrics: &PublicationMetrics,
        ttl_hours: i64,
    ) -> Result<()> {
        require_non_empty("normalized_name", &metrics.normalized_name)?;
        let now = now_timestamp();
        let expires_at = expiry_from_ttl(now, ttl_hours)?;
        let payload = serde_json::to_string(metrics)?;

        let mut write = self.begin_write().await?;
        sqlx::query(
            r#"
            INSERT INTO publication_metrics (metrics_key, issn, normalized_name, data, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(metrics_key) DO UPDATE SET
                issn = excluded.issn,
                normalized_name = excluded.normalized_name,
                data = excluded.data,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(metrics.metrics_key())
        .bind(metrics.issn.as_deref())
        .bind(metrics.normalized_name.trim().to_lowercase())
        .bind(&payload)
        .bind(now)
        .bind(expires_at)
        .execute(&mut *write.tx)
        .await?;
        write.commit().await?;

        debug!(target: TARGET_DB, "Cached publication metrics for {}", metrics.metrics_key());
        Ok(())
    }

    /// Look up metrics by ISSN first, then by normalized name.
    #[instrument(target = "db", level = "debug", skip(self))]
    pub async fn get_publication_metrics(
        &self,
        issn: Option<&str>,
        normalized_name: Option<&str>,
    ) -> Result<Option<PublicationMetrics>> {
        let mut keys = Vec::new();
        if let Some(issn) = issn.filter(|i| !i.trim().is_empty()) {
            keys.push(metrics_key(Some(issn), ""));
        }
        if let Some(name) = normalized_name.filter(|n| !n.trim().is_empty()) {
            keys.push(metrics_key(None, name));
        }

        let now = now_timestamp();
        for key in keys {
            let payload: Option<String> = sqlx::query_scalar(
                "SELECT data FROM publication_metrics WHERE metrics_key = ?1 AND expires_at > ?2",
            )
            .bind(&key)
            .bind(now)
            .fetch_optional(self.pool())
            .await?;

            if let Some(payload) = payload {
                match serde_json::from_str::<PublicationMetrics>(&payload) {
                    Ok(metrics) => return Ok(Some(metrics)),
                    Err(err) => {
                        warn!(target: TARGET_DB, "Unreadable publication metrics for {}: {}", key, err)
                    }
                }
            }
        }
        Ok(None)
    }
}
