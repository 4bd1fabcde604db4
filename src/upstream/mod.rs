//! Upstream integrations
//!
//! - `session`: access/refresh token lifecycle for the pollution API
//! - `retry`: generic retry driver with exponential backoff and jitter
//! - `pollution`: authenticated pollution data source
//! - `enrichment`: city summary lookups

pub mod enrichment;
pub mod pollution;
pub mod retry;
pub mod session;

pub use enrichment::{EnrichmentClient, EnrichmentOutcome};
pub use pollution::{PageMeta, PollutionBatch, PollutionClient};
pub use retry::{Attempt, RetryPolicy};
pub use session::SessionManager;

use thiserror::Error;

/// Failure of a login or refresh exchange with the pollution API
#[derive(Debug, Error)]
pub enum AuthError {
    /// Request never produced a response (connect, timeout, ...)
    #[error("{exchange} request failed: {source}")]
    Transport {
        exchange: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// Upstream answered with a non-success status
    #[error("{exchange} rejected with HTTP {status}")]
    Rejected { exchange: &'static str, status: u16 },

    /// Response body did not contain a usable token
    #[error("{exchange} returned a malformed token response: {message}")]
    MalformedResponse {
        exchange: &'static str,
        message: String,
    },

    /// Refresh requested while no refresh token is held
    #[error("no refresh token available, login required")]
    NoRefreshToken,
}

/// Failure of a data call against an upstream service
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Upstream answered with a non-success status
    #[error("upstream responded with HTTP {0}")]
    Status(u16),

    /// Request never produced a response
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Body was not valid JSON
    #[error("upstream body could not be decoded: {0}")]
    Decode(String),

    /// Body was JSON but not one of the accepted shapes
    #[error("unrecognized upstream response shape: {0}")]
    UnrecognizedShape(String),

    /// No access token could be obtained for the call
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl UpstreamError {
    /// True for a client error that is not a rate limit, i.e. the
    /// upstream has definitively answered "no".
    pub fn is_client_rejection(&self) -> bool {
        matches!(self, UpstreamError::Status(status) if (400..500).contains(status) && *status != 429)
    }
}
