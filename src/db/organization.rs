use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::core::{now_timestamp, Database};
use super::validation::{expiry_from_ttl, require_non_empty, validate_cache_key};
use crate::error::Result;

/// Identity of a publisher or host institution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrganizationRecord {
    pub organization_id: String,
    pub name: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

fn normalize_org_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl Database {
    #[instrument(target = "db", level = "debug", skip(self, org), fields(id = %org.organization_id))]
    pub async fn cache_organization(&self, org: &OrganizationRecord, ttl_hours: i64) -> Result<()> {
        validate_cache_key(&org.organization_id)?;
        require_non_empty("organization name", &org.name)?;
        let now = now_timestamp();
        let expires_at = expiry_from_ttl(now, ttl_hours)?;
        let payload = serde_json::to_string(org)?;

        let mut write = self.begin_write().await?;
        sqlx::query(
            r#"
            INSERT INTO organization_cache (organization_id, name, normalized_name, data, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(organization_id) DO UPDATE SET
                name = excluded.name,
                normalized_name = excluded.normalized_name,
                data = excluded.data,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&org.organization_id)
        .bind(&org.name)
        .bind(normalize_org_name(&org.name))
        .bind(&payload)
        .bind(now)
        .bind(expires_at)
        .execute(&mut *write.tx)
        .await?;
        write.commit().await?;
        Ok(())
    }

    pub async fn get_cached_organization(
        &self,
        organization_id: &str,
    ) -> Result<Option<OrganizationRecord>> {
        validate_cache_key(organization_id)?;
        let payload: Option<String> = sqlx::query_scalar(
            "SELECT data FROM organization_cache WHERE organization_id = ?1 AND expires_at > ?2",
        )
        .bind(organization_id)
        .bind(now_timestamp())
        .fetch_optional(self.pool())
        .await?;
        Ok(payload.and_then(|p| serde_json::from_str(&p).ok()))
    }

    /// Unexpired organizations whose name matches, case and spacing ignored.
    pub async fn find_organization_by_name(&self, name: &str) -> Result<Vec<OrganizationRecord>> {
        let normalized = normalize_org_name(name);
        if normalized.is_empty() {
            return Ok(Vec::new());
        }
        let payloads: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT data FROM organization_cache
            WHERE normalized_name = ?1 AND expires_at > ?2
            ORDER BY organization_id
            "#,
        )
        .bind(&normalized)
        .bind(now_timestamp())
        .fetch_all(self.pool())
        .await?;

        Ok(payloads
            .iter()
            .filter_map(|p| serde_json::from_str(p).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::core::test_support::temp_database;

    #[tokio::test]
    async fn test_cache_and_find() {
        let (db, _dir) = temp_database().await;
        let org = OrganizationRecord {
            organization_id: "P4310320990".to_string(),
            name: "Springer  Nature".to_string(),
            country: Some("DE".to_string()),
            ..Default::default()
        };
        db.cache_organization(&org, 24).await.unwrap();

        let cached = db.get_cached_organization("P4310320990").await.unwrap().unwrap();
        assert_eq!(cached.country.as_deref(), Some("DE"));
        assert!(cached.aliases.is_empty());

        let found = db.find_organization_by_name("springer nature").await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(db.find_organization_by_name("  ").await.unwrap().is_empty());
        assert!(db.get_cached_organization("").await.unwrap_err().is_validation());
    }
}
