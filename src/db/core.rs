use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Pool, Sqlite, Transaction,
};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{sleep, Duration};
use tracing::{info, instrument};

use crate::TARGET_DB;

const MAX_BEGIN_RETRIES: u32 = 5;

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
    // SQLite allows one writer; every write path holds this for its transaction
    write_lock: Arc<Mutex<()>>,
}

/// An open write transaction together with the writer lock it was started under.
pub(crate) struct WriteTransaction<'a> {
    pub tx: Transaction<'static, Sqlite>,
    _guard: MutexGuard<'a, ()>,
}

impl WriteTransaction<'_> {
    pub async fn commit(self) -> Result<(), sqlx::Error> {
        self.tx.commit().await
    }
}

impl Database {
    /// Get access to the database pool
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

// Helper method to check if an sqlx error is a database lock error
pub trait DbLockErrorExt {
    fn is_database_lock_error(&self) -> bool;
}

impl DbLockErrorExt for sqlx::Error {
    fn is_database_lock_error(&self) -> bool {
        match self {
            // SQLITE_BUSY (5), SQLITE_LOCKED (6) and their extended codes
            sqlx::Error::Database(err) => err
                .code()
                .map_or(false, |c| matches!(c.as_ref(), "5" | "6" | "261" | "517" | "262")),
            _ => false,
        }
    }
}

impl Database {
    #[instrument(target = "db", level = "info")]
    pub async fn new(database_path: &str) -> Result<Self, sqlx::Error> {
        info!(target: TARGET_DB, "Creating database pool for: {}", database_path);

        let connect_options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", database_path))?
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(Duration::from_secs(5))
                .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;

        info!(target: TARGET_DB, "Database pool created");

        // Initialize schema
        let db = Database {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        };
        db.initialize_schema().await?;

        Ok(db)
    }

    /// Take the writer lock and open a transaction, backing off while SQLite
    /// reports the file as busy.
    pub(crate) async fn begin_write(&self) -> Result<WriteTransaction<'_>, sqlx::Error> {
        let guard = self.write_lock.lock().await;
        let mut backoff = 50; // initial delay in milliseconds

        for attempt in 1..=MAX_BEGIN_RETRIES {
            match self.pool.begin().await {
                Ok(tx) => {
                    return Ok(WriteTransaction { tx, _guard: guard });
                }
                Err(err) if err.is_database_lock_error() && attempt < MAX_BEGIN_RETRIES => {
                    info!(
                        target: TARGET_DB,
                        "Database is locked, waiting {}ms before retrying attempt {}/{}",
                        backoff,
                        attempt,
                        MAX_BEGIN_RETRIES
                    );
                    sleep(Duration::from_millis(backoff)).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(err) => return Err(err),
            }
        }

        Err(sqlx::Error::Protocol(
            "Maximum retries exceeded opening a write transaction".into(),
        ))
    }

    /// Row counts for every table, for diagnostics
    pub async fn collect_stats(&self) -> Result<String, sqlx::Error> {
        let queries = vec![
            "SELECT COUNT(*) FROM assessment_cache;",
            "SELECT COUNT(*) FROM data_sources;",
            "SELECT COUNT(*) FROM journal_entries;",
            "SELECT COUNT(*) FROM key_value_cache;",
            "SELECT COUNT(*) FROM publication_metrics;",
            "SELECT COUNT(*) FROM retraction_cache;",
            "SELECT COUNT(*) FROM retraction_statistics;",
            "SELECT COUNT(*) FROM organization_cache;",
        ];

        let mut results = vec![];
        for query in queries {
            let count: i64 = sqlx::query_scalar(query).fetch_one(&self.pool).await?;
            results.push(count);
        }

        Ok(results
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(":"))
    }
}

/// Current unix time in seconds
pub(crate) fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Database;
    use tempfile::TempDir;

    /// Fresh database in a temporary directory. Keep the `TempDir` alive for the
    /// duration of the test.
    pub async fn temp_database() -> (Database, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("themis-test.db");
        let db = Database::new(path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::temp_database;

    #[tokio::test]
    async fn test_new_creates_schema() {
        let (db, _dir) = temp_database().await;
        assert_eq!(db.collect_stats().await.unwrap(), "0:0:0:0:0:0:0:0");
    }

    #[tokio::test]
    async fn test_reopen_existing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("reopen.db");
        let path = path.to_str().unwrap();
        drop(super::Database::new(path).await.unwrap());
        assert!(super::Database::new(path).await.is_ok());
    }
}
