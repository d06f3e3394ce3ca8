use tracing::info;

use super::core::Database;
use crate::TARGET_DB;

impl Database {
    pub(crate) async fn initialize_schema(&self) -> Result<(), sqlx::Error> {
        let mut conn = self.pool().acquire().await?;
        sqlx::query(
            r#"
            -- Whole-query verdicts keyed by the 32-hex query hash
            CREATE TABLE IF NOT EXISTS assessment_cache (
                query_hash TEXT PRIMARY KEY,
                query_input TEXT NOT NULL,
                result TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_assessment_cache_expires_at ON assessment_cache (expires_at);

            -- Registered membership lists
            CREATE TABLE IF NOT EXISTS data_sources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL,
                list_type TEXT NOT NULL, -- predatory, legitimate, hijacked, ...
                description TEXT,
                created_at INTEGER NOT NULL
            );

            -- Venues appearing on a registered list
            CREATE TABLE IF NOT EXISTS journal_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id INTEGER NOT NULL,
                assessment TEXT NOT NULL,
                journal_name TEXT NOT NULL,
                normalized_name TEXT NOT NULL,
                issn TEXT,
                eissn TEXT,
                publisher TEXT,
                metadata TEXT,
                updated_at INTEGER NOT NULL,
                UNIQUE(source_id, normalized_name),
                FOREIGN KEY (source_id) REFERENCES data_sources (id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_journal_entries_normalized_name ON journal_entries (normalized_name COLLATE NOCASE);
            CREATE INDEX IF NOT EXISTS idx_journal_entries_issn ON journal_entries (issn);
            CREATE INDEX IF NOT EXISTS idx_journal_entries_eissn ON journal_entries (eissn);

            -- Refresh history per source
            CREATE TABLE IF NOT EXISTS source_updates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id INTEGER NOT NULL,
                status TEXT NOT NULL, -- success, failed
                records_updated INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                updated_at INTEGER NOT NULL,
                FOREIGN KEY (source_id) REFERENCES data_sources (id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_source_updates_source ON source_updates (source_id, status, updated_at);

            -- Generic blobs, used for per-backend result caching
            CREATE TABLE IF NOT EXISTS key_value_cache (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_key_value_cache_expires_at ON key_value_cache (expires_at);

            -- Publication metrics keyed by ISSN or "name:<normalized name>"
            CREATE TABLE IF NOT EXISTS publication_metrics (
                metrics_key TEXT PRIMARY KEY,
                issn TEXT,
                normalized_name TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_publication_metrics_expires_at ON publication_metrics (expires_at);

            -- Retraction status per DOI
            CREATE TABLE IF NOT EXISTS retraction_cache (
                doi TEXT PRIMARY KEY,
                is_retracted BOOLEAN NOT NULL,
                data TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_retraction_cache_expires_at ON retraction_cache (expires_at);

            -- Retraction counts per journal, keyed like publication_metrics
            CREATE TABLE IF NOT EXISTS retraction_statistics (
                stats_key TEXT PRIMARY KEY,
                issn TEXT,
                normalized_name TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_retraction_statistics_name ON retraction_statistics (normalized_name COLLATE NOCASE);

            -- Publisher / institution identity
            CREATE TABLE IF NOT EXISTS organization_cache (
                organization_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                normalized_name TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_organization_cache_name ON organization_cache (normalized_name COLLATE NOCASE);
            "#,
        )
        .execute(&mut *conn)
        .await?;

        info!(target: TARGET_DB, "Database schema initialized");
        Ok(())
    }
}
