pub mod aggregator;
pub mod assessor;
pub mod backends;
pub mod confidence;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod environment;
pub mod error;
pub mod fallback;
pub mod logging;
pub mod normalizer;
pub mod types;
pub mod updater;
pub mod validation;

pub use crate::assessor::Assessor;
pub use crate::error::{Result, ThemisError};
pub use crate::types::{
    AssessmentResult, AssessmentType, BackendResult, BackendStatus, EvidenceType, QueryInput,
    VenueType,
};

pub const TARGET_WEB_REQUEST: &str = "web_request";
pub const TARGET_DB: &str = "db_query";
pub const TARGET_BACKEND: &str = "backend";
pub const TARGET_ASSESSMENT: &str = "assessment";
