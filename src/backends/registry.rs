//! Backend name → factory map, owned by the assessor.

use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::cross_validator::CrossValidatorBackend;
use super::crossref::{CrossrefBackend, CROSSREF_BASE_URL};
use super::doaj::{DoajBackend, DOAJ_BASE_URL};
use super::http::ApiClient;
use super::list::ListBackend;
use super::openalex::{OpenAlexBackend, OPENALEX_BASE_URL};
use super::retraction::RetractionWatchBackend;
use super::EvidenceBackend;
use crate::config::AppConfig;
use crate::db::validation::validate_ttl_hours;
use crate::db::Database;
use crate::error::{Result, ThemisError};
use crate::types::EvidenceType;
use crate::TARGET_BACKEND;

/// Construction parameters; overrides are merged over a factory's defaults.
pub type BackendParams = BTreeMap<String, Value>;

pub type BackendFactory =
    Arc<dyn Fn(&BackendParams) -> Result<Arc<dyn EvidenceBackend>> + Send + Sync>;

/// List backends backed by the membership cache: (name, evidence type)
pub const LIST_BACKENDS: &[(&str, EvidenceType)] = &[
    ("bealls", EvidenceType::PredatoryList),
    ("predatoryjournals", EvidenceType::PredatoryList),
    ("kscien_predatory_conferences", EvidenceType::PredatoryList),
    ("kscien_hijacked_journals", EvidenceType::PredatoryList),
    ("scopus", EvidenceType::LegitimateList),
];

#[derive(Clone)]
struct Registration {
    factory: BackendFactory,
    defaults: BackendParams,
}

#[derive(Clone, Default)]
pub struct BackendRegistry {
    registrations: BTreeMap<String, Registration>,
    instances: Arc<Mutex<HashMap<String, Arc<dyn EvidenceBackend>>>>,
}

pub fn param_str(params: &BackendParams, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn required_str(params: &BackendParams, key: &str) -> Result<String> {
    param_str(params, key)
        .ok_or_else(|| ThemisError::Config(format!("Missing backend parameter '{}'", key)))
}

fn ttl_param(params: &BackendParams) -> Result<i64> {
    let ttl = params
        .get("cache_ttl_hours")
        .and_then(Value::as_i64)
        .ok_or_else(|| ThemisError::Config("Missing backend parameter 'cache_ttl_hours'".to_string()))?;
    validate_ttl_hours(ttl).map_err(|e| ThemisError::Config(e.to_string()))?;
    Ok(ttl)
}

fn api_client(source_name: &str, params: &BackendParams) -> Result<ApiClient> {
    let base_url = required_str(params, "base_url")?;
    ApiClient::new(source_name, &base_url, param_str(params, "email").as_deref())
        .map_err(|e| ThemisError::Config(format!("Could not build {} client: {}", source_name, e)))
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in backend, sharing `db` and the configured
    /// contact email and cache TTL.
    pub fn with_defaults(db: Database, config: &AppConfig) -> Self {
        let mut registry = Self::new();
        let mut shared = BackendParams::new();
        shared.insert("cache_ttl_hours".to_string(), json!(config.cache_ttl_hours));
        shared.insert("email".to_string(), json!(config.email));

        for (name, evidence_type) in LIST_BACKENDS {
            let db = db.clone();
            let evidence_type = *evidence_type;
            let mut defaults = shared.clone();
            defaults.insert("source_name".to_string(), json!(name));
            registry.register_factory(
                name,
                move |params: &BackendParams| {
                    let backend_name = required_str(params, "name")?;
                    let source_name = required_str(params, "source_name")?;
                    let backend: Arc<dyn EvidenceBackend> = Arc::new(ListBackend::new(
                        &backend_name,
                        &source_name,
                        evidence_type,
                        db.clone(),
                        ttl_param(params)?,
                    ));
                    Ok(backend)
                },
                defaults,
            );
        }

        let with_url = |url: &str| {
            let mut defaults = shared.clone();
            defaults.insert("base_url".to_string(), json!(url));
            defaults
        };

        let doaj_db = db.clone();
        registry.register_factory(
            DoajBackend::NAME,
            move |params: &BackendParams| {
                let client = api_client("doaj", params)?;
                let backend: Arc<dyn EvidenceBackend> =
                    Arc::new(DoajBackend::new(doaj_db.clone(), client, ttl_param(params)?));
                Ok(backend)
            },
            with_url(DOAJ_BASE_URL),
        );

        let openalex_db = db.clone();
        registry.register_factory(
            OpenAlexBackend::NAME,
            move |params: &BackendParams| {
                let client = api_client("openalex", params)?;
                let backend: Arc<dyn EvidenceBackend> = Arc::new(OpenAlexBackend::new(
                    openalex_db.clone(),
                    client,
                    param_str(params, "email"),
                    ttl_param(params)?,
                ));
                Ok(backend)
            },
            with_url(OPENALEX_BASE_URL),
        );

        let crossref_db = db.clone();
        registry.register_factory(
            CrossrefBackend::NAME,
            move |params: &BackendParams| {
                let client = api_client("crossref", params)?;
                let backend: Arc<dyn EvidenceBackend> = Arc::new(CrossrefBackend::new(
                    crossref_db.clone(),
                    client,
                    param_str(params, "email"),
                    ttl_param(params)?,
                ));
                Ok(backend)
            },
            with_url(CROSSREF_BASE_URL),
        );

        let composite_db = db.clone();
        let mut composite_defaults = shared.clone();
        composite_defaults.insert("openalex_base_url".to_string(), json!(OPENALEX_BASE_URL));
        composite_defaults.insert("crossref_base_url".to_string(), json!(CROSSREF_BASE_URL));
        registry.register_factory(
            CrossValidatorBackend::NAME,
            move |params: &BackendParams| {
                let backend = CrossValidatorBackend::new(
                    composite_db.clone(),
                    param_str(params, "email"),
                    ttl_param(params)?,
                    &required_str(params, "openalex_base_url")?,
                    &required_str(params, "crossref_base_url")?,
                )
                .map_err(|e| ThemisError::Config(format!("Could not build cross_validator: {}", e)))?;
                let backend: Arc<dyn EvidenceBackend> = Arc::new(backend);
                Ok(backend)
            },
            composite_defaults,
        );

        let retraction_db = db;
        registry.register_factory(
            RetractionWatchBackend::NAME,
            move |params: &BackendParams| {
                let backend: Arc<dyn EvidenceBackend> =
                    Arc::new(RetractionWatchBackend::new(retraction_db.clone(), ttl_param(params)?));
                Ok(backend)
            },
            shared,
        );

        info!(
            target: TARGET_BACKEND,
            "Registered {} backends",
            registry.registrations.len()
        );
        registry
    }

    /// Register (or replace) the factory for `name`. The backend name itself is
    /// always passed to the factory as the `name` parameter.
    pub fn register_factory<F>(&mut self, name: &str, factory: F, default_params: BackendParams)
    where
        F: Fn(&BackendParams) -> Result<Arc<dyn EvidenceBackend>> + Send + Sync + 'static,
    {
        self.registrations.insert(
            name.to_string(),
            Registration {
                factory: Arc::new(factory),
                defaults: default_params,
            },
        );
        self.lock_instances().remove(name);
    }

    /// Build a fresh backend with `overrides` merged over the defaults.
    pub fn create_backend(
        &self,
        name: &str,
        overrides: &BackendParams,
    ) -> Result<Arc<dyn EvidenceBackend>> {
        let registration = self
            .registrations
            .get(name)
            .ok_or_else(|| ThemisError::UnknownBackend(name.to_string()))?;

        let mut params = registration.defaults.clone();
        params.insert("name".to_string(), json!(name));
        for (key, value) in overrides {
            params.insert(key.clone(), value.clone());
        }

        debug!(target: TARGET_BACKEND, "Creating backend {}", name);
        (registration.factory)(&params)
    }

    /// The shared instance for `name`, created with default parameters on first use.
    pub fn get_backend(&self, name: &str) -> Result<Arc<dyn EvidenceBackend>> {
        if let Some(backend) = self.lock_instances().get(name) {
            return Ok(backend.clone());
        }

        let backend = self.create_backend(name, &BackendParams::new())?;
        let mut instances = self.lock_instances();
        // Another caller may have raced us here; keep whichever landed first
        Ok(instances
            .entry(name.to_string())
            .or_insert(backend)
            .clone())
    }

    pub fn get_backend_names(&self) -> Vec<String> {
        self.registrations.keys().cloned().collect()
    }

    fn lock_instances(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<dyn EvidenceBackend>>> {
        self.instances
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
