use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

use super::core::{now_timestamp, Database};
use super::validation::require_non_empty;
use crate::db::Row;
use crate::error::{Result, ThemisError};
use crate::normalizer::normalize_issn;
use crate::types::{AssessmentType, JournalRecord};
use crate::TARGET_DB;

/// A registered membership list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceInfo {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub list_type: AssessmentType,
    pub description: Option<String>,
}

/// One stored membership row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: i64,
    pub source_name: String,
    pub assessment: AssessmentType,
    pub journal_name: String,
    pub normalized_name: String,
    pub issn: Option<String>,
    pub eissn: Option<String>,
    pub publisher: Option<String>,
    pub metadata: BTreeMap<String, Value>,
}

/// AND-combined filters for `search_journals`. Unset fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct JournalSearch<'a> {
    pub normalized_name: Option<&'a str>,
    /// Matches either the print or the electronic ISSN column
    pub issn: Option<&'a str>,
    pub source_name: Option<&'a str>,
    pub assessment: Option<AssessmentType>,
}

/// Entry counts for one source and assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStatistics {
    pub source_name: String,
    pub assessment: AssessmentType,
    pub entries: i64,
    pub last_updated: Option<DateTime<Utc>>,
}

fn clean_issn(raw: Option<&str>) -> Option<String> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    Some(normalize_issn(raw).unwrap_or_else(|| raw.to_uppercase()))
}

fn entry_from_row(row: &SqliteRow) -> JournalEntry {
    let assessment: String = row.get("assessment");
    let metadata: Option<String> = row.get("metadata");
    JournalEntry {
        id: row.get("id"),
        source_name: row.get("source_name"),
        assessment: AssessmentType::from(assessment.as_str()),
        journal_name: row.get("journal_name"),
        normalized_name: row.get("normalized_name"),
        issn: row.get("issn"),
        eissn: row.get("eissn"),
        publisher: row.get("publisher"),
        metadata: metadata
            .and_then(|m| serde_json::from_str(&m).ok())
            .unwrap_or_default(),
    }
}

impl Database {
    /// Register (or update) a membership list. Entries can only be added to
    /// registered sources.
    #[instrument(target = "db", level = "info", skip(self, description))]
    pub async fn register_data_source(
        &self,
        name: &str,
        display_name: &str,
        list_type: AssessmentType,
        description: Option<&str>,
    ) -> Result<i64> {
        require_non_empty("source name", name)?;

        let mut write = self.begin_write().await?;
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO data_sources (name, display_name, list_type, description, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(name) DO UPDATE SET
                display_name = excluded.display_name,
                list_type = excluded.list_type,
                description = excluded.description
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(display_name)
        .bind(list_type.as_str())
        .bind(description)
        .bind(now_timestamp())
        .fetch_one(&mut *write.tx)
        .await?;
        write.commit().await?;

        debug!(target: TARGET_DB, "Registered data source {} with id {}", name, id);
        Ok(id)
    }

    pub async fn get_data_source(&self, name: &str) -> Result<Option<DataSourceInfo>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, display_name, list_type, description
            FROM data_sources WHERE name = ?1
            "#,
        )
        .bind(name)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|row| {
            let list_type: String = row.get("list_type");
            DataSourceInfo {
                id: row.get("id"),
                name: row.get("name"),
                display_name: row.get("display_name"),
                list_type: AssessmentType::from(list_type.as_str()),
                description: row.get("description"),
            }
        }))
    }

    async fn require_source_id(
        conn: &mut sqlx::SqliteConnection,
        source_name: &str,
    ) -> Result<i64> {
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM data_sources WHERE name = ?1")
            .bind(source_name)
            .fetch_optional(conn)
            .await?;
        id.ok_or_else(|| {
            ThemisError::validation(format!("Data source '{}' is not registered", source_name))
        })
    }

    fn validate_entry(assessment: AssessmentType, record: &JournalRecord) -> Result<()> {
        if assessment == AssessmentType::Unknown {
            return Err(ThemisError::validation("Journal entry needs an assessment"));
        }
        require_non_empty("journal_name", &record.journal_name)?;
        require_non_empty("normalized_name", &record.normalized_name)
    }

    async fn upsert_entry(
        conn: &mut sqlx::SqliteConnection,
        source_id: i64,
        assessment: AssessmentType,
        record: &JournalRecord,
        now: i64,
    ) -> Result<i64> {
        let metadata = if record.metadata.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&record.metadata)?)
        };

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO journal_entries
                (source_id, assessment, journal_name, normalized_name, issn, eissn, publisher, metadata, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(source_id, normalized_name) DO UPDATE SET
                assessment = excluded.assessment,
                journal_name = excluded.journal_name,
                issn = excluded.issn,
                eissn = excluded.eissn,
                publisher = excluded.publisher,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(source_id)
        .bind(assessment.as_str())
        .bind(record.journal_name.trim())
        .bind(record.normalized_name.trim())
        .bind(clean_issn(record.issn.as_deref()))
        .bind(clean_issn(record.eissn.as_deref()))
        .bind(record.publisher.as_deref().map(str::trim).filter(|p| !p.is_empty()))
        .bind(metadata)
        .bind(now)
        .fetch_one(conn)
        .await?;
        Ok(id)
    }

    /// Add or replace one venue on a registered list.
    #[instrument(target = "db", level = "info", skip(self, record), fields(journal = %record.journal_name))]
    pub async fn add_journal_entry(
        &self,
        source_name: &str,
        assessment: AssessmentType,
        record: &JournalRecord,
    ) -> Result<i64> {
        require_non_empty("source_name", source_name)?;
        Self::validate_entry(assessment, record)?;

        let mut write = self.begin_write().await?;
        let source_id = Self::require_source_id(&mut write.tx, source_name).await?;
        let id = Self::upsert_entry(&mut write.tx, source_id, assessment, record, now_timestamp()).await?;
        write.commit().await?;

        Ok(id)
    }

    /// Add many entries to one source in a single transaction. Either all rows are
    /// written or none are.
    #[instrument(target = "db", level = "info", skip(self, records), fields(count = records.len()))]
    pub async fn add_journal_entries(
        &self,
        source_name: &str,
        assessment: AssessmentType,
        records: &[JournalRecord],
    ) -> Result<usize> {
        require_non_empty("source_name", source_name)?;
        for record in records {
            Self::validate_entry(assessment, record)?;
        }

        let now = now_timestamp();
        let mut write = self.begin_write().await?;
        let source_id = Self::require_source_id(&mut write.tx, source_name).await?;
        for record in records {
            Self::upsert_entry(&mut write.tx, source_id, assessment, record, now).await?;
        }
        write.commit().await?;

        info!(target: TARGET_DB, "Stored {} entries for source {}", records.len(), source_name);
        Ok(records.len())
    }

    /// Make `records` the complete membership of `source_name`: rows missing
    /// from `records` are removed in the same transaction as the upserts.
    #[instrument(target = "db", level = "info", skip(self, records), fields(count = records.len()))]
    pub async fn replace_journal_entries(
        &self,
        source_name: &str,
        assessment: AssessmentType,
        records: &[JournalRecord],
    ) -> Result<usize> {
        require_non_empty("source_name", source_name)?;
        for record in records {
            Self::validate_entry(assessment, record)?;
        }

        let now = now_timestamp();
        let mut write = self.begin_write().await?;
        let source_id = Self::require_source_id(&mut write.tx, source_name).await?;
        let removed = sqlx::query("DELETE FROM journal_entries WHERE source_id = ?1")
            .bind(source_id)
            .execute(&mut *write.tx)
            .await?
            .rows_affected();
        for record in records {
            Self::upsert_entry(&mut write.tx, source_id, assessment, record, now).await?;
        }
        write.commit().await?;

        info!(
            target: TARGET_DB,
            "Replaced {} entries of source {} with {}",
            removed,
            source_name,
            records.len()
        );
        Ok(records.len())
    }

    /// Search membership rows; every supplied filter must match.
    #[instrument(target = "db", level = "debug", skip(self))]
    pub async fn search_journals(&self, search: &JournalSearch<'_>) -> Result<Vec<JournalEntry>> {
        let mut sql = String::from(
            r#"
            SELECT e.id, s.name AS source_name, e.assessment, e.journal_name, e.normalized_name,
                   e.issn, e.eissn, e.publisher, e.metadata
            FROM journal_entries e
            JOIN data_sources s ON s.id = e.source_id
            WHERE 1 = 1
            "#,
        );
        let mut binds: Vec<String> = Vec::new();

        if let Some(name) = search.normalized_name {
            sql.push_str(" AND e.normalized_name = ? COLLATE NOCASE");
            binds.push(name.trim().to_string());
        }
        if let Some(issn) = search.issn {
            let issn = clean_issn(Some(issn)).unwrap_or_default();
            sql.push_str(" AND (e.issn = ? OR e.eissn = ?)");
            binds.push(issn.clone());
            binds.push(issn);
        }
        if let Some(source) = search.source_name {
            sql.push_str(" AND s.name = ?");
            binds.push(source.to_string());
        }
        if let Some(assessment) = search.assessment {
            sql.push_str(" AND e.assessment = ?");
            binds.push(assessment.as_str().to_string());
        }
        sql.push_str(" ORDER BY e.id");

        let mut query = sqlx::query(&sql);
        for value in &binds {
            query = query.bind(value.clone());
        }
        let rows = query.fetch_all(self.pool()).await?;

        Ok(rows.iter().map(entry_from_row).collect())
    }

    /// Record the outcome of a source refresh.
    #[instrument(target = "db", level = "info", skip(self, error_message))]
    pub async fn log_update(
        &self,
        source_name: &str,
        success: bool,
        records_updated: usize,
        error_message: Option<&str>,
    ) -> Result<()> {
        let mut write = self.begin_write().await?;
        let source_id = Self::require_source_id(&mut write.tx, source_name).await?;
        sqlx::query(
            r#"
            INSERT INTO source_updates (source_id, status, records_updated, error_message, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(source_id)
        .bind(if success { "success" } else { "failed" })
        .bind(records_updated as i64)
        .bind(error_message)
        .bind(now_timestamp())
        .execute(&mut *write.tx)
        .await?;
        write.commit().await?;
        Ok(())
    }

    /// Time of the last successful refresh of `source_name`, if any.
    pub async fn get_source_last_updated(&self, source_name: &str) -> Result<Option<DateTime<Utc>>> {
        let last: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MAX(u.updated_at)
            FROM source_updates u
            JOIN data_sources s ON s.id = u.source_id
            WHERE s.name = ?1 AND u.status = 'success'
            "#,
        )
        .bind(source_name)
        .fetch_one(self.pool())
        .await?;

        Ok(last.and_then(|ts| Utc.timestamp_opt(ts, 0).single()))
    }

    pub async fn get_source_statistics(&self) -> Result<Vec<SourceStatistics>> {
        let rows = sqlx::query(
            r#"
            SELECT s.name AS source_name, e.assessment, COUNT(*) AS entries,
                   (SELECT MAX(u.updated_at) FROM source_updates u
                    WHERE u.source_id = s.id AND u.status = 'success') AS last_updated
            FROM journal_entries e
            JOIN data_sources s ON s.id = e.source_id
            GROUP BY s.id, e.assessment
            ORDER BY s.name, e.assessment
            "#,
        )
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let assessment: String = row.get("assessment");
                let last_updated: Option<i64> = row.get("last_updated");
                SourceStatistics {
                    source_name: row.get("source_name"),
                    assessment: AssessmentType::from(assessment.as_str()),
                    entries: row.get("entries"),
                    last_updated: last_updated.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
                }
            })
            .collect())
    }
}
