//! JSON API client with per-request timeouts and retry/backoff.

use reqwest::{header, StatusCode, Url};
use serde_json::Value;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::BackendError;
use crate::TARGET_WEB_REQUEST;

/// Retries after the first attempt for 429 / 5xx / network errors
pub const MAX_RETRIES: u32 = 3;
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
/// Upper bound honoured for a server-supplied Retry-After
const MAX_RETRY_AFTER_SECS: u64 = 60;

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    source_name: String,
    base_url: String,
    max_retries: u32,
    initial_backoff: Duration,
    request_timeout: Duration,
}

fn user_agent(email: Option<&str>) -> String {
    match email {
        Some(email) => format!(
            "themis/{} (mailto:{})",
            env!("CARGO_PKG_VERSION"),
            email
        ),
        None => format!("themis/{}", env!("CARGO_PKG_VERSION")),
    }
}

fn retry_after_secs(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

impl ApiClient {
    /// Client for one upstream API. `email` goes into the User-Agent for
    /// polite-pool access.
    pub fn new(source_name: &str, base_url: &str, email: Option<&str>) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .gzip(true)
            .user_agent(user_agent(email))
            .redirect(reqwest::redirect::Policy::default())
            .build()?;

        debug!(target: TARGET_WEB_REQUEST, "Created API client for {} at {}", source_name, base_url);

        Ok(ApiClient {
            http,
            source_name: source_name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries: MAX_RETRIES,
            initial_backoff: INITIAL_BACKOFF,
            request_timeout: REQUEST_TIMEOUT,
        })
    }

    pub fn with_retry_policy(mut self, max_retries: u32, initial_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.initial_backoff = initial_backoff;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_url(&self, segments: &[&str], params: &[(&str, String)]) -> Result<Url, BackendError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| BackendError::Parse(format!("Invalid base URL {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| BackendError::Parse(format!("Base URL {} cannot take a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        if !params.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    /// GET `segments` (each percent-encoded) below the base URL and parse the
    /// body as JSON. A 404 is `Ok(None)`.
    ///
    /// 429 and 5xx responses and network errors are retried with doubling
    /// backoff; a 429 waits for `Retry-After` when the server sends one. Other
    /// 4xx statuses fail immediately. A 429 on the last attempt surfaces as
    /// `BackendError::RateLimited`.
    pub async fn get_json(
        &self,
        segments: &[&str],
        params: &[(&str, String)],
    ) -> Result<Option<Value>, BackendError> {
        let url = self.build_url(segments, params)?;
        let mut backoff = self.initial_backoff;

        for attempt in 0..=self.max_retries {
            let last_attempt = attempt == self.max_retries;
            debug!(target: TARGET_WEB_REQUEST, "GET {} (attempt {})", url, attempt + 1);

            let response = match timeout(
                self.request_timeout,
                self.http
                    .get(url.clone())
                    .header(header::ACCEPT, "application/json")
                    .send(),
            )
            .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(err)) => {
                    if last_attempt {
                        return Err(BackendError::Http(err));
                    }
                    warn!(target: TARGET_WEB_REQUEST, "{} request failed, retrying in {:?}: {}", self.source_name, backoff, err);
                    sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    continue;
                }
                Err(_) => {
                    if last_attempt {
                        return Err(BackendError::Timeout(self.request_timeout));
                    }
                    warn!(target: TARGET_WEB_REQUEST, "{} request timed out, retrying in {:?}", self.source_name, backoff);
                    sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    continue;
                }
            };

            let status = response.status();

            if status == StatusCode::NOT_FOUND {
                debug!(target: TARGET_WEB_REQUEST, "{} returned 404 for {}", self.source_name, url);
                return Ok(None);
            }

            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                let retry_after = retry_after_secs(&response);
                if last_attempt {
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        return Err(BackendError::RateLimited { retry_after });
                    }
                    return Err(BackendError::Status {
                        source_name: self.source_name.clone(),
                        status: status.as_u16(),
                        message: format!("upstream error after {} attempts", attempt + 1),
                    });
                }

                let wait = match retry_after {
                    Some(secs) if status == StatusCode::TOO_MANY_REQUESTS => {
                        Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS))
                    }
                    _ => backoff,
                };
                info!(
                    target: TARGET_WEB_REQUEST,
                    "{} returned {}, retry {}/{} in {:?}",
                    self.source_name,
                    status.as_u16(),
                    attempt + 1,
                    self.max_retries,
                    wait
                );
                sleep(wait).await;
                backoff = backoff.saturating_mul(2);
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(BackendError::Status {
                    source_name: self.source_name.clone(),
                    status: status.as_u16(),
                    message: body.chars().take(200).collect(),
                });
            }

            let text = response.text().await?;
            let trimmed = text.trim_start_matches('\u{feff}');
            let body: Value = serde_json::from_str(trimmed).map_err(|e| {
                BackendError::Parse(format!(
                    "{} returned invalid JSON: {} (body: {})",
                    self.source_name,
                    e,
                    trimmed.chars().take(200).collect::<String>()
                ))
            })?;
            return Ok(Some(body));
        }

        Err(BackendError::Status {
            source_name: self.source_name.clone(),
            status: 0,
            message: "retry budget exhausted".to_string(),
        })
    }
}
