//! SQLite evidence store: one `impl Database` block per cache table group.

mod assessment;
pub mod core;
pub mod journals;
mod kv;
pub mod metrics;
pub mod organization;
pub mod retraction;
mod schema;
pub mod validation;

pub use self::core::Database;
pub use self::core::DbLockErrorExt;
pub use self::journals::{DataSourceInfo, JournalEntry, JournalSearch, SourceStatistics};
pub use self::metrics::PublicationMetrics;
pub use self::organization::OrganizationRecord;
pub use self::retraction::{RetractionRecord, RetractionStatistics};
pub use self::validation::MAX_TTL_HOURS;
pub use sqlx::Row;
