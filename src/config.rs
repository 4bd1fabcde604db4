//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub pollution_api: PollutionApiConfig,
    #[serde(default)]
    pub enrichment_api: EnrichmentApiConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 3000)
    pub port: u16,
}

/// Upstream pollution API (authenticated)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollutionApiConfig {
    /// Base URL, e.g. "https://pollution.example.com/api"
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Timeout for data requests (default: 15)
    pub request_timeout_seconds: u64,
    /// Timeout for login/refresh exchanges (default: 10)
    pub auth_timeout_seconds: u64,
    /// Seconds shaved off every token lifetime (default: 60)
    pub token_safety_margin_seconds: i64,
    /// Upstream page requested per fetch (default: 1)
    pub fetch_page: u32,
    /// Upstream page size requested per fetch (default: 50)
    pub fetch_limit: u32,
    pub retry: RetryConfig,
}

impl Default for PollutionApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            password: String::new(),
            request_timeout_seconds: 15,
            auth_timeout_seconds: 10,
            token_safety_margin_seconds: 60,
            fetch_page: 1,
            fetch_limit: 50,
            retry: RetryConfig {
                max_attempts: 4,
                base_delay_ms: 2_000,
                factor: 2.0,
                max_delay_ms: 15_000,
                jitter: true,
            },
        }
    }
}

/// City summary lookup service (unauthenticated)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichmentApiConfig {
    /// Base URL, e.g. "https://en.wikipedia.org/api/rest_v1"
    pub base_url: String,
    /// User-Agent sent with every lookup
    pub user_agent: String,
    /// Timeout per lookup (default: 8)
    pub request_timeout_seconds: u64,
    /// Summaries longer than this are truncated (default: 200)
    pub summary_max_chars: usize,
    /// Lookups in flight per request (default: 4)
    pub concurrency: usize,
    pub retry: RetryConfig,
}

impl Default for EnrichmentApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://en.wikipedia.org/api/rest_v1".to_string(),
            user_agent: concat!("PollutionAggregator/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout_seconds: 8,
            summary_max_chars: 200,
            concurrency: 4,
            retry: RetryConfig {
                max_attempts: 4,
                base_delay_ms: 1_000,
                factor: 2.0,
                max_delay_ms: 10_000,
                jitter: true,
            },
        }
    }
}

/// Retry policy parameters
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub factor: f64,
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_jitter() -> bool {
    true
}

/// Cache configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL for both city lists and unenrichable names (default: 60)
    pub ttl_minutes: u64,
    /// Interval of the expired-entry sweep (default: 600)
    pub sweep_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: 60,
            sweep_interval_seconds: 600,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ttl_minutes * 60)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (AGGREGATOR__SECTION__KEY)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Environment, File};

        let config = Self::builder_with_defaults()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("AGGREGATOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Builder seeded with every default that a source may partially override
    ///
    /// Retry policies are seeded key by key, so overriding a single field
    /// (e.g. `AGGREGATOR__POLLUTION_API__RETRY__MAX_ATTEMPTS`) keeps the
    /// section's defaults for the rest.
    fn builder_with_defaults()
    -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
        let builder = config::Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?;

        let builder = seed_retry(
            builder,
            "pollution_api.retry",
            &PollutionApiConfig::default().retry,
        )?;
        seed_retry(
            builder,
            "enrichment_api.retry",
            &EnrichmentApiConfig::default().retry,
        )
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        use crate::error::AppError;

        validate_base_url("pollution_api.base_url", &self.pollution_api.base_url)?;
        validate_base_url("enrichment_api.base_url", &self.enrichment_api.base_url)?;

        if self.pollution_api.username.trim().is_empty()
            || self.pollution_api.password.is_empty()
        {
            return Err(AppError::Config(
                "pollution_api.username and pollution_api.password are required".to_string(),
            ));
        }

        for (name, retry) in [
            ("pollution_api.retry", &self.pollution_api.retry),
            ("enrichment_api.retry", &self.enrichment_api.retry),
        ] {
            if retry.max_attempts == 0 {
                return Err(AppError::Config(format!(
                    "{name}.max_attempts must be greater than 0"
                )));
            }
            if !(retry.factor >= 1.0) {
                return Err(AppError::Config(format!(
                    "{name}.factor must be at least 1.0"
                )));
            }
        }

        if self.enrichment_api.concurrency == 0 {
            return Err(AppError::Config(
                "enrichment_api.concurrency must be greater than 0".to_string(),
            ));
        }

        if self.cache.ttl_minutes == 0 {
            return Err(AppError::Config(
                "cache.ttl_minutes must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn seed_retry(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
    prefix: &str,
    retry: &RetryConfig,
) -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
    builder
        .set_default(format!("{prefix}.max_attempts"), i64::from(retry.max_attempts))?
        .set_default(format!("{prefix}.base_delay_ms"), retry.base_delay_ms)?
        .set_default(format!("{prefix}.factor"), retry.factor)?
        .set_default(format!("{prefix}.max_delay_ms"), retry.max_delay_ms)?
        .set_default(format!("{prefix}.jitter"), retry.jitter)
}

fn validate_base_url(field: &str, value: &str) -> Result<(), crate::error::AppError> {
    let parsed = url::Url::parse(value.trim()).map_err(|e| {
        crate::error::AppError::Config(format!("{field} is not a valid URL: {e}"))
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(crate::error::AppError::Config(format!(
            "{field} must use http or https, got {scheme}"
        ))),
    }
}
