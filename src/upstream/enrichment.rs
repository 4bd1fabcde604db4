//! City summary lookups
//!
//! Enrichment is best-effort: every failure is absorbed here and reported as
//! an [`EnrichmentOutcome`], never as an error.

use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::header::USER_AGENT;
use serde::Deserialize;

use super::UpstreamError;
use super::retry::{self, Attempt, RetryPolicy, attempt_from, classify_status, classify_transport};
use crate::config::EnrichmentApiConfig;
use crate::data::Country;
use crate::metrics::{ENRICHMENT_OUTCOMES_TOTAL, UPSTREAM_REQUESTS_TOTAL};

lazy_static! {
    static ref CITATION_MARKER: Regex = Regex::new(r"\[\d+\]").expect("valid citation regex");
}

/// Result of looking up one city
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrichmentOutcome {
    /// Cleaned, possibly truncated summary
    Found(String),
    /// Upstream confirmed there is nothing for this name
    Missing,
    /// Lookup failed for a reason that may go away (retries exhausted, ...)
    Unavailable,
}

impl EnrichmentOutcome {
    pub fn into_description(self) -> Option<String> {
        match self {
            EnrichmentOutcome::Found(text) => Some(text),
            EnrichmentOutcome::Missing | EnrichmentOutcome::Unavailable => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            EnrichmentOutcome::Found(_) => "found",
            EnrichmentOutcome::Missing => "missing",
            EnrichmentOutcome::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    #[serde(default)]
    extract: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

impl SummaryResponse {
    fn text(self) -> Option<String> {
        self.extract
            .filter(|text| !text.trim().is_empty())
            .or(self.description)
    }
}

/// Strip citation markers, collapse whitespace and truncate
///
/// Returns `None` when nothing is left.
pub fn clean_summary(raw: &str, max_chars: usize) -> Option<String> {
    let without_citations = CITATION_MARKER.replace_all(raw, "");
    let collapsed = without_citations
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if collapsed.is_empty() {
        return None;
    }

    if collapsed.chars().count() <= max_chars {
        return Some(collapsed);
    }

    let truncated: String = collapsed.chars().take(max_chars).collect();
    Some(format!("{}...", truncated.trim_end()))
}

/// Client for the city summary service
pub struct EnrichmentClient {
    http: reqwest::Client,
    base_url: String,
    user_agent: String,
    timeout: Duration,
    max_chars: usize,
    policy: RetryPolicy,
}

impl EnrichmentClient {
    pub fn new(http: reqwest::Client, config: &EnrichmentApiConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
            timeout: Duration::from_secs(config.request_timeout_seconds),
            max_chars: config.summary_max_chars,
            policy: RetryPolicy::from(&config.retry),
        }
    }

    /// Short description of `city`, if the lookup service has one
    pub async fn describe(&self, city: &str, country: Country) -> Option<String> {
        self.lookup(city, country).await.into_description()
    }

    /// Look up `city`, distinguishing confirmed absence from failure
    pub async fn lookup(&self, city: &str, country: Country) -> EnrichmentOutcome {
        let url = format!(
            "{}/page/summary/{}",
            self.base_url,
            urlencoding::encode(city)
        );
        let url = url.as_str();

        let result = retry::execute(&self.policy, "enrichment", move |_| {
            self.attempt_lookup(url)
        })
        .await;

        let outcome = match result {
            Ok(Some(text)) => match clean_summary(&text, self.max_chars) {
                Some(summary) => EnrichmentOutcome::Found(summary),
                None => EnrichmentOutcome::Missing,
            },
            Ok(None) => EnrichmentOutcome::Missing,
            Err(error) if error.is_client_rejection() => {
                tracing::debug!(city, country = %country, %error, "No summary for city");
                EnrichmentOutcome::Missing
            }
            Err(error) => {
                tracing::warn!(city, country = %country, %error, "Summary lookup failed");
                EnrichmentOutcome::Unavailable
            }
        };

        ENRICHMENT_OUTCOMES_TOTAL
            .with_label_values(&[outcome.label()])
            .inc();
        outcome
    }

    async fn attempt_lookup(&self, url: &str) -> Attempt<Option<String>, UpstreamError> {
        let response = match self
            .http
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => {
                UPSTREAM_REQUESTS_TOTAL
                    .with_label_values(&["enrichment", "transport_error"])
                    .inc();
                return attempt_from(classify_transport(&error), error.into());
            }
        };

        let status = response.status();
        UPSTREAM_REQUESTS_TOTAL
            .with_label_values(&["enrichment", status.as_str()])
            .inc();

        if !status.is_success() {
            return attempt_from(classify_status(status), UpstreamError::Status(status.as_u16()));
        }

        match response.json::<SummaryResponse>().await {
            Ok(summary) => Attempt::Success(summary.text()),
            Err(error) => Attempt::Abort(UpstreamError::Decode(error.to_string())),
        }
    }
}
