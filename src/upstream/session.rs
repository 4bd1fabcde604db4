//! Upstream session management
//!
//! Holds the access/refresh token pair for the pollution API. The session
//! lives behind a single async mutex that is held for the whole
//! check → refresh → login sequence, so concurrent callers queue behind one
//! in-flight exchange and then reuse its token.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::AuthError;
use crate::config::PollutionApiConfig;
use crate::metrics::SESSION_EXCHANGES_TOTAL;

/// Authenticated session state
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Already reduced by the safety margin
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Access token, if present and not yet expired at `now`
    pub fn usable_token(&self, now: DateTime<Utc>) -> Option<&str> {
        match (&self.access_token, self.expires_at) {
            (Some(token), Some(expires_at)) if now < expires_at => Some(token.as_str()),
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        *self = Session::default();
    }
}

/// Token exchange response
///
/// Login and refresh endpoints disagree on casing, so both spellings are
/// accepted for every field.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(alias = "token")]
    access_token: String,
    #[serde(default, alias = "refreshToken")]
    refresh_token: Option<String>,
    #[serde(alias = "expiresIn")]
    expires_in: i64,
}

/// Credential session manager for the pollution API
pub struct SessionManager {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    timeout: Duration,
    safety_margin: TimeDelta,
    session: Mutex<Session>,
}

impl SessionManager {
    pub fn new(http: reqwest::Client, config: &PollutionApiConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            timeout: Duration::from_secs(config.auth_timeout_seconds),
            safety_margin: TimeDelta::try_seconds(config.token_safety_margin_seconds)
                .unwrap_or(TimeDelta::zero()),
            session: Mutex::new(Session::default()),
        }
    }

    /// Get an access token that is valid right now
    ///
    /// Reuses the current token while it is fresh. Otherwise refreshes when a
    /// refresh token is held and falls back to a full login if that fails.
    ///
    /// # Errors
    /// Returns `AuthError` when login fails; the session is left empty.
    pub async fn valid_access_token(&self) -> Result<String, AuthError> {
        let mut session = self.session.lock().await;

        if let Some(token) = session.usable_token(Utc::now()) {
            return Ok(token.to_string());
        }

        if session.refresh_token.is_some() {
            match self.refresh_locked(&mut session).await {
                Ok(token) => return Ok(token),
                Err(error) => {
                    tracing::warn!(%error, "Token refresh failed, attempting fresh login");
                }
            }
        }

        self.login_locked(&mut session).await
    }

    /// Drop all tokens so the next caller starts with a login
    pub async fn clear(&self) {
        self.session.lock().await.clear();
        tracing::debug!("Upstream session cleared");
    }

    /// Drop all tokens, but only while `rejected` is still the stored token
    ///
    /// A caller holding a stale token must not discard a session another
    /// caller has already renewed.
    pub async fn clear_if_current(&self, rejected: &str) {
        let mut session = self.session.lock().await;
        if session.access_token.as_deref() == Some(rejected) {
            session.clear();
            tracing::debug!("Upstream session cleared");
        }
    }

    /// Copy of the current session state
    pub async fn snapshot(&self) -> Session {
        self.session.lock().await.clone()
    }

    async fn login_locked(&self, session: &mut Session) -> Result<String, AuthError> {
        let body = serde_json::json!({
            "username": self.username,
            "password": self.password,
        });

        let result = self
            .exchange("login", "auth/login", &body)
            .await
            .and_then(|tokens| self.apply("login", session, tokens));

        match result {
            Ok(token) => {
                tracing::info!("Logged in to pollution API");
                Ok(token)
            }
            Err(error) => {
                session.clear();
                tracing::error!(%error, "Login to pollution API failed");
                Err(error)
            }
        }
    }

    async fn refresh_locked(&self, session: &mut Session) -> Result<String, AuthError> {
        let Some(refresh_token) = session.refresh_token.clone() else {
            return Err(AuthError::NoRefreshToken);
        };

        let body = serde_json::json!({ "refreshToken": refresh_token });

        let result = self
            .exchange("refresh", "auth/refresh", &body)
            .await
            .and_then(|tokens| self.apply("refresh", session, tokens));

        match result {
            Ok(token) => {
                tracing::debug!("Refreshed pollution API access token");
                Ok(token)
            }
            Err(error) => {
                // A rejected refresh token must never be offered again.
                session.clear();
                Err(error)
            }
        }
    }

    /// Single POST to a token endpoint, no retries
    async fn exchange(
        &self,
        exchange: &'static str,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<TokenResponse, AuthError> {
        let url = format!("{}/{}", self.base_url, path);

        let response = self
            .http
            .post(&url)
            .header(ACCEPT, "application/json")
            .json(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|source| {
                SESSION_EXCHANGES_TOTAL
                    .with_label_values(&[exchange, "transport_error"])
                    .inc();
                AuthError::Transport { exchange, source }
            })?;

        let status = response.status();
        if !status.is_success() {
            SESSION_EXCHANGES_TOTAL
                .with_label_values(&[exchange, "rejected"])
                .inc();
            return Err(AuthError::Rejected {
                exchange,
                status: status.as_u16(),
            });
        }

        let tokens = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AuthError::MalformedResponse {
                exchange,
                message: e.to_string(),
            })?;

        SESSION_EXCHANGES_TOTAL
            .with_label_values(&[exchange, "ok"])
            .inc();
        Ok(tokens)
    }

    /// Store a token response and return the new access token
    ///
    /// # Errors
    /// `AuthError::MalformedResponse` when the lifetime does not fit a
    /// timestamp.
    fn apply(
        &self,
        exchange: &'static str,
        session: &mut Session,
        tokens: TokenResponse,
    ) -> Result<String, AuthError> {
        let expires_at = expiry(Utc::now(), tokens.expires_in, self.safety_margin).ok_or_else(
            || AuthError::MalformedResponse {
                exchange,
                message: format!("token lifetime out of range: {}", tokens.expires_in),
            },
        )?;

        session.expires_at = Some(expires_at);
        session.access_token = Some(tokens.access_token.clone());
        if let Some(refresh_token) = tokens.refresh_token {
            session.refresh_token = Some(refresh_token);
        }
        Ok(tokens.access_token)
    }
}

/// `now + expires_in - margin`, or `None` if it overflows
fn expiry(now: DateTime<Utc>, expires_in: i64, margin: TimeDelta) -> Option<DateTime<Utc>> {
    now.checked_add_signed(TimeDelta::try_seconds(expires_in)?)?
        .checked_sub_signed(margin)
}
