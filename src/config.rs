//! Runtime configuration, read from the environment.

use std::time::Duration;
use tracing::info;

use crate::environment::{get_env_var_or, get_env_var_parsed};
use crate::error::{Result, ThemisError};
use crate::TARGET_BACKEND;

pub const DEFAULT_DATABASE_PATH: &str = "themis.db";
pub const DEFAULT_CACHE_TTL_HOURS: i64 = 24;
pub const DEFAULT_ASSESSMENT_TTL_HOURS: i64 = 24;
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Weight and timeout of one enabled backend
#[derive(Debug, Clone, PartialEq)]
pub struct BackendSettings {
    pub name: String,
    pub weight: f64,
    pub timeout: Duration,
    pub enabled: bool,
}

impl BackendSettings {
    pub fn new(name: &str, weight: f64, timeout_secs: u64) -> Self {
        BackendSettings {
            name: name.to_string(),
            weight,
            timeout: Duration::from_secs(timeout_secs),
            enabled: true,
        }
    }
}

/// Backends enabled when `THEMIS_BACKENDS` is not set: (name, weight, timeout seconds)
pub const DEFAULT_BACKENDS: &[(&str, f64, u64)] = &[
    ("bealls", 1.0, 5),
    ("predatoryjournals", 1.0, 5),
    ("kscien_predatory_conferences", 0.9, 5),
    ("kscien_hijacked_journals", 1.0, 5),
    ("scopus", 1.0, 5),
    ("doaj", 1.0, 15),
    ("openalex_analyzer", 0.8, 20),
    ("crossref_analyzer", 0.6, 20),
    ("cross_validator", 0.9, 30),
    ("retraction_watch", 0.5, 10),
];

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: String,
    pub email: Option<String>,
    pub cache_ttl_hours: i64,
    pub assessment_ttl_hours: i64,
    pub backends: Vec<BackendSettings>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_path: DEFAULT_DATABASE_PATH.to_string(),
            email: None,
            cache_ttl_hours: DEFAULT_CACHE_TTL_HOURS,
            assessment_ttl_hours: DEFAULT_ASSESSMENT_TTL_HOURS,
            backends: default_backends(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `THEMIS_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = AppConfig {
            database_path: get_env_var_or("THEMIS_DATABASE_PATH", DEFAULT_DATABASE_PATH),
            ..Default::default()
        };

        let email = get_env_var_or("THEMIS_EMAIL", "");
        if !email.is_empty() {
            config.email = Some(email);
        }

        if let Some(ttl) = get_env_var_parsed::<i64>("THEMIS_CACHE_TTL_HOURS").map_err(ThemisError::Config)? {
            config.cache_ttl_hours = ttl;
        }
        if let Some(ttl) =
            get_env_var_parsed::<i64>("THEMIS_ASSESSMENT_TTL_HOURS").map_err(ThemisError::Config)?
        {
            config.assessment_ttl_hours = ttl;
        }

        let specs = get_env_var_or("THEMIS_BACKENDS", "");
        if !specs.is_empty() {
            config.backends = parse_backend_specs(&specs)?;
        }

        config.validate()?;
        info!(
            target: TARGET_BACKEND,
            "Loaded configuration: database={}, {} backends enabled",
            config.database_path,
            config.enabled_backends().count()
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (label, ttl) in [
            ("THEMIS_CACHE_TTL_HOURS", self.cache_ttl_hours),
            ("THEMIS_ASSESSMENT_TTL_HOURS", self.assessment_ttl_hours),
        ] {
            if ttl <= 0 || ttl > crate::db::MAX_TTL_HOURS {
                return Err(ThemisError::Config(format!(
                    "{} must be between 1 and {} hours, got {}",
                    label,
                    crate::db::MAX_TTL_HOURS,
                    ttl
                )));
            }
        }
        if self.enabled_backends().next().is_none() {
            return Err(ThemisError::Config("No backends enabled".to_string()));
        }
        Ok(())
    }

    pub fn enabled_backends(&self) -> impl Iterator<Item = &BackendSettings> {
        self.backends.iter().filter(|b| b.enabled)
    }
}

pub fn default_backends() -> Vec<BackendSettings> {
    DEFAULT_BACKENDS
        .iter()
        .map(|(name, weight, timeout)| BackendSettings::new(name, *weight, *timeout))
        .collect()
}

/// Parse `name|weight|timeout_secs[|off];...` backend specifications.
///
/// Weight and timeout are optional and default to 1.0 and
/// `DEFAULT_BACKEND_TIMEOUT`.
pub fn parse_backend_specs(specs: &str) -> Result<Vec<BackendSettings>> {
    let mut backends = Vec::new();

    for spec in specs.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let parts: Vec<&str> = spec.split('|').map(str::trim).collect();
        let name = parts[0];
        if name.is_empty() {
            return Err(ThemisError::Config(format!("Backend spec '{}' has no name", spec)));
        }

        let weight = match parts.get(1) {
            Some(raw) if !raw.is_empty() => raw.parse::<f64>().map_err(|_| {
                ThemisError::Config(format!("Invalid weight '{}' for backend {}", raw, name))
            })?,
            _ => 1.0,
        };
        if !(0.0..=10.0).contains(&weight) {
            return Err(ThemisError::Config(format!(
                "Weight for backend {} must be between 0 and 10, got {}",
                name, weight
            )));
        }

        let timeout = match parts.get(2) {
            Some(raw) if !raw.is_empty() => {
                let secs = raw.parse::<u64>().map_err(|_| {
                    ThemisError::Config(format!("Invalid timeout '{}' for backend {}", raw, name))
                })?;
                if secs == 0 {
                    return Err(ThemisError::Config(format!(
                        "Timeout for backend {} must be positive",
                        name
                    )));
                }
                Duration::from_secs(secs)
            }
            _ => DEFAULT_BACKEND_TIMEOUT,
        };

        let enabled = !matches!(parts.get(3), Some(flag) if flag.eq_ignore_ascii_case("off"));

        backends.push(BackendSettings {
            name: name.to_string(),
            weight,
            timeout,
            enabled,
        });
    }

    Ok(backends)
}
