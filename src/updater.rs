//! Refreshes membership lists from their data sources.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{error, info, warn};

use crate::backends::BackendError;
use crate::db::Database;
use crate::error::Result;
use crate::types::{AssessmentType, JournalRecord};
use crate::TARGET_DB;

pub const DEFAULT_UPDATE_INTERVAL_DAYS: i64 = 30;

/// A membership list that can be fetched in full.
#[async_trait]
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    fn display_name(&self) -> &str {
        self.name()
    }

    fn description(&self) -> Option<&str> {
        None
    }

    /// Category every entry of this list receives
    fn list_type(&self) -> AssessmentType;

    fn update_interval_days(&self) -> i64 {
        DEFAULT_UPDATE_INTERVAL_DAYS
    }

    /// True when the source was never refreshed successfully or the last
    /// refresh is older than the interval.
    async fn should_update(&self, db: &Database) -> bool {
        match db.get_source_last_updated(self.name()).await {
            Ok(Some(last)) => Utc::now() - last >= Duration::days(self.update_interval_days()),
            Ok(None) => true,
            Err(err) => {
                warn!(target: TARGET_DB, "Could not read last update of {}: {}", self.name(), err);
                true
            }
        }
    }

    async fn fetch_data(&self) -> std::result::Result<Vec<JournalRecord>, BackendError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Skipped,
    Updated(usize),
    Failed(String),
}

pub struct SourceUpdater {
    db: Database,
}

impl SourceUpdater {
    pub fn new(db: Database) -> Self {
        SourceUpdater { db }
    }

    /// Fetch `source` and replace its entries in one transaction, logging the
    /// outcome. Venues the source no longer lists are dropped. A failed fetch is reported as `Failed`; storage errors
    /// propagate.
    pub async fn update_source(&self, source: &dyn DataSource, force: bool) -> Result<UpdateOutcome> {
        let name = source.name();
        if !force && !source.should_update(&self.db).await {
            info!(target: TARGET_DB, "Source {} is fresh, skipping", name);
            return Ok(UpdateOutcome::Skipped);
        }

        self.db
            .register_data_source(name, source.display_name(), source.list_type(), source.description())
            .await?;

        let records = match source.fetch_data().await {
            Ok(records) => records,
            Err(err) => {
                let message = err.to_string();
                error!(target: TARGET_DB, "Fetching {} failed: {}", name, message);
                self.db.log_update(name, false, 0, Some(&message)).await?;
                return Ok(UpdateOutcome::Failed(message));
            }
        };

        match self
            .db
            .replace_journal_entries(name, source.list_type(), &records)
            .await
        {
            Ok(count) => {
                self.db.log_update(name, true, count, None).await?;
                info!(target: TARGET_DB, "Updated {} with {} entries", name, count);
                Ok(UpdateOutcome::Updated(count))
            }
            Err(err) => {
                self.db
                    .log_update(name, false, 0, Some(&err.to_string()))
                    .await?;
                Err(err)
            }
        }
    }

    pub async fn update_all(
        &self,
        sources: &[Box<dyn DataSource>],
        force: bool,
    ) -> Result<Vec<(String, UpdateOutcome)>> {
        let mut outcomes = Vec::with_capacity(sources.len());
        for source in sources {
            let outcome = self.update_source(source.as_ref(), force).await?;
            outcomes.push((source.name().to_string(), outcome));
        }
        Ok(outcomes)
    }
}
