//! Pollution data source
//!
//! Fetches raw city readings for one country from the authenticated
//! upstream API.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Deserializer};

use super::retry::{self, Attempt, RetryPolicy, attempt_from, classify_status, classify_transport};
use super::{AuthError, SessionManager, UpstreamError};
use crate::config::PollutionApiConfig;
use crate::data::{Country, RawCityRecord};
use crate::metrics::UPSTREAM_REQUESTS_TOTAL;

/// Pagination metadata reported by upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageMeta {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub total_pages: u64,
}

/// Raw readings for one country, normalized to a single shape
#[derive(Debug, Clone, PartialEq)]
pub struct PollutionBatch {
    pub results: Vec<RawCityRecord>,
    pub meta: PageMeta,
}

impl PollutionBatch {
    pub fn empty(page: u32, limit: u32) -> Self {
        Self {
            results: Vec::new(),
            meta: PageMeta {
                page: page.into(),
                limit: limit.into(),
                total: 0,
                total_pages: 0,
            },
        }
    }

    /// Whether upstream reports readings beyond this page
    pub fn is_partial(&self) -> bool {
        self.meta.total_pages > self.meta.page || self.meta.total > self.results.len() as u64
    }
}

/// Pagination fields, found either at top level or under `meta`
///
/// Every field is optional and read leniently; a malformed value counts as
/// absent and never rejects the body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetaFields {
    #[serde(default, deserialize_with = "lenient_count")]
    page: Option<u64>,
    #[serde(default, deserialize_with = "lenient_count")]
    limit: Option<u64>,
    #[serde(default, deserialize_with = "lenient_count")]
    total: Option<u64>,
    #[serde(default, deserialize_with = "lenient_count")]
    total_pages: Option<u64>,
}

fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(count_from_value))
}

fn lenient_meta<'de, D>(deserializer: D) -> Result<Option<MetaFields>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| MetaFields::deserialize(v).ok()))
}

/// Non-negative whole number from a JSON number or numeric string
fn count_from_value(value: &serde_json::Value) -> Option<u64> {
    let whole = |n: f64| (n.is_finite() && n >= 0.0 && n.fract() == 0.0).then_some(n as u64);

    match value {
        serde_json::Value::Number(n) => n.as_u64().or_else(|| n.as_f64().and_then(whole)),
        serde_json::Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(whole))
        }
        _ => None,
    }
}

/// Accepted response bodies
///
/// Variants are tried in order, so a body carrying both `cities` and
/// `results` is read from `cities`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PollutionBody {
    Cities {
        cities: Vec<RawCityRecord>,
        #[serde(flatten)]
        top: MetaFields,
        #[serde(default, deserialize_with = "lenient_meta")]
        meta: Option<MetaFields>,
    },
    Results {
        results: Vec<RawCityRecord>,
        #[serde(flatten)]
        top: MetaFields,
        #[serde(default, deserialize_with = "lenient_meta")]
        meta: Option<MetaFields>,
    },
    Bare(Vec<RawCityRecord>),
}

/// Parse an upstream body into a batch
///
/// # Errors
/// `UpstreamError::UnrecognizedShape` for any body that is not one of the
/// accepted shapes.
pub fn parse_pollution_body(
    body: serde_json::Value,
    requested_page: u32,
    requested_limit: u32,
) -> Result<PollutionBatch, UpstreamError> {
    let (results, top, nested) = match PollutionBody::deserialize(body) {
        Ok(PollutionBody::Cities { cities, top, meta }) => (cities, top, meta.unwrap_or_default()),
        Ok(PollutionBody::Results { results, top, meta }) => {
            (results, top, meta.unwrap_or_default())
        }
        Ok(PollutionBody::Bare(results)) => (results, MetaFields::default(), MetaFields::default()),
        Err(_) => {
            return Err(UpstreamError::UnrecognizedShape(
                "expected an array or an object with a `cities` or `results` array".to_string(),
            ));
        }
    };

    let count = results.len() as u64;
    let meta = PageMeta {
        page: top.page.or(nested.page).unwrap_or(requested_page.into()),
        limit: top.limit.or(nested.limit).unwrap_or(requested_limit.into()),
        total: top.total.or(nested.total).unwrap_or(count),
        total_pages: top.total_pages.or(nested.total_pages).unwrap_or(1),
    };

    Ok(PollutionBatch { results, meta })
}

/// Client for the authenticated pollution API
pub struct PollutionClient {
    http: reqwest::Client,
    session: Arc<SessionManager>,
    base_url: String,
    page: u32,
    limit: u32,
    timeout: Duration,
    policy: RetryPolicy,
}

impl PollutionClient {
    pub fn new(
        http: reqwest::Client,
        session: Arc<SessionManager>,
        config: &PollutionApiConfig,
    ) -> Self {
        Self {
            http,
            session,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            page: config.fetch_page,
            limit: config.fetch_limit,
            timeout: Duration::from_secs(config.request_timeout_seconds),
            policy: RetryPolicy::from(&config.retry),
        }
    }

    /// Fetch raw readings for `country`, absorbing data-call failures
    ///
    /// Any `UpstreamError` is logged and turned into an empty batch; callers
    /// treat "no data" as a normal outcome.
    ///
    /// # Errors
    /// Returns `AuthError` when no session could be established.
    pub async fn fetch(&self, country: Country) -> Result<PollutionBatch, AuthError> {
        match self.try_fetch(country).await {
            Ok(batch) => Ok(batch),
            Err(UpstreamError::Auth(error)) => Err(error),
            Err(error) => {
                tracing::error!(country = %country, %error, "Error fetching pollution data");
                Ok(PollutionBatch::empty(self.page, self.limit))
            }
        }
    }

    /// Fetch raw readings for `country`
    ///
    /// # Errors
    /// Returns the last `UpstreamError` after retries are exhausted or a
    /// non-retryable failure occurs.
    pub async fn try_fetch(&self, country: Country) -> Result<PollutionBatch, UpstreamError> {
        let url = format!("{}/pollution", self.base_url);
        let url = url.as_str();

        let body = retry::execute(&self.policy, "pollution", move |attempt| {
            self.attempt_fetch(url, country, attempt)
        })
        .await?;

        let batch = parse_pollution_body(body, self.page, self.limit)?;
        if batch.is_partial() {
            tracing::warn!(
                country = %country,
                results = batch.results.len(),
                total = batch.meta.total,
                total_pages = batch.meta.total_pages,
                "Upstream holds more readings than one page; raise pollution_api.fetch_limit"
            );
        } else {
            tracing::debug!(
                country = %country,
                results = batch.results.len(),
                "Fetched pollution data"
            );
        }
        Ok(batch)
    }

    async fn attempt_fetch(
        &self,
        url: &str,
        country: Country,
        attempt: u32,
    ) -> Attempt<serde_json::Value, UpstreamError> {
        let token = match self.session.valid_access_token().await {
            Ok(token) => token,
            Err(error) => return Attempt::Abort(error.into()),
        };

        let response = match self
            .http
            .get(url)
            .query(&[
                ("country", country.code().to_string()),
                ("page", self.page.to_string()),
                ("limit", self.limit.to_string()),
            ])
            .bearer_auth(&token)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => {
                UPSTREAM_REQUESTS_TOTAL
                    .with_label_values(&["pollution", "transport_error"])
                    .inc();
                tracing::warn!(attempt, %error, "Network error calling pollution API");
                return attempt_from(classify_transport(&error), error.into());
            }
        };

        let status = response.status();
        UPSTREAM_REQUESTS_TOTAL
            .with_label_values(&["pollution", status.as_str()])
            .inc();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            tracing::warn!(attempt, status = status.as_u16(), "Authentication failed, clearing tokens");
            self.session.clear_if_current(&token).await;
            // One more try with a fresh session, then give up.
            return if attempt == 1 {
                Attempt::Retry(UpstreamError::Status(status.as_u16()))
            } else {
                Attempt::Abort(UpstreamError::Status(status.as_u16()))
            };
        }

        if !status.is_success() {
            if status == StatusCode::TOO_MANY_REQUESTS {
                tracing::warn!(attempt, "Pollution API rate limited");
            } else if status.is_client_error() {
                tracing::error!(status = status.as_u16(), "Client error from pollution API, not retrying");
            }
            return attempt_from(classify_status(status), UpstreamError::Status(status.as_u16()));
        }

        match response.bytes().await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(body) => Attempt::Success(body),
                Err(error) => Attempt::Abort(UpstreamError::Decode(error.to_string())),
            },
            Err(error) => attempt_from(classify_transport(&error), error.into()),
        }
    }
}
