//! Pollution Aggregator - most polluted cities per country, enriched
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - GET /cities, /health, /metrics                           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Service Layer                            │
//! │  - Normalize, deduplicate, filter, sort                     │
//! │  - Enrichment fan-out and pagination                        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌──────────────────────────────┬──────────────────────────────┐
//! │         Data Layer           │        Upstream Layer         │
//! │  - City models               │  - Session (login/refresh)    │
//! │  - TTL result cache          │  - Pollution API, summaries   │
//! │                              │  - Retry with backoff         │
//! └──────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `service`: Record processing and aggregation
//! - `upstream`: Clients for the pollution and summary services
//! - `data`: Domain models and the result cache
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus instruments

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod service;
pub mod upstream;

use std::sync::Arc;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// City lists and unenrichable names, both with TTL
    pub cache: Arc<data::ResultCache>,

    /// Aggregation pipeline
    pub aggregator: Arc<service::Aggregator>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Build the shared HTTP client
    /// 2. Create the session manager and upstream clients
    /// 3. Create the result cache
    /// 4. Wire the aggregation service
    ///
    /// No upstream call is made here; the first login happens lazily.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        // 1. Initialize HTTP client
        let http_client = reqwest::Client::builder()
            .user_agent(config.enrichment_api.user_agent.as_str())
            .build()?;

        // 2. Upstream clients
        let session = Arc::new(upstream::SessionManager::new(
            http_client.clone(),
            &config.pollution_api,
        ));
        let pollution = Arc::new(upstream::PollutionClient::new(
            http_client.clone(),
            session,
            &config.pollution_api,
        ));
        let enrichment = Arc::new(upstream::EnrichmentClient::new(
            http_client,
            &config.enrichment_api,
        ));
        tracing::info!(
            pollution_api = %config.pollution_api.base_url,
            enrichment_api = %config.enrichment_api.base_url,
            "Upstream clients initialized"
        );

        // 3. Cache
        let cache = Arc::new(data::ResultCache::new(config.cache.ttl()));
        tracing::info!(ttl_minutes = config.cache.ttl_minutes, "Cache initialized");

        // 4. Aggregation service
        let aggregator = Arc::new(service::Aggregator::new(
            pollution,
            enrichment,
            cache.clone(),
            config.enrichment_api.concurrency,
        ));

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            cache,
            aggregator,
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::cities_router())
        .merge(api::metrics_router())
        .fallback(not_found)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn not_found(uri: axum::http::Uri) -> error::AppError {
    error::AppError::NotFound(format!("Route {} not found", uri.path()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            pollution_api: config::PollutionApiConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                username: "aggregator".to_string(),
                password: "secret".to_string(),
                ..Default::default()
            },
            enrichment_api: Default::default(),
            cache: Default::default(),
            logging: config::LoggingConfig {
                level: "debug".to_string(),
                format: "pretty".to_string(),
            },
        };
        AppState::new(config).unwrap()
    }

    #[tokio::test]
    async fn health_route_responds_ok() {
        let response = build_router(test_state())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_uses_json_fallback() {
        let response = build_router(test_state())
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Route /nope not found");
    }

    #[tokio::test]
    async fn cities_without_country_is_bad_request() {
        let response = build_router(test_state())
            .oneshot(Request::get("/cities?page=2").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
