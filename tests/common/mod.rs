//! Common test utilities for E2E tests

#![allow(dead_code)]

use pollution_aggregator::{AppState, config};
use tokio::net::TcpListener;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Test server instance
///
/// Both upstream services are served by one wiremock server: the pollution
/// API at its root and the summary service under `/wiki`.
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub upstream: MockServer,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        pollution_aggregator::metrics::init_metrics();

        let upstream = MockServer::start().await;

        // Create test configuration
        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
            },
            pollution_api: config::PollutionApiConfig {
                base_url: upstream.uri(),
                username: "aggregator".to_string(),
                password: "secret".to_string(),
                retry: fast_retry(),
                ..Default::default()
            },
            enrichment_api: config::EnrichmentApiConfig {
                base_url: format!("{}/wiki", upstream.uri()),
                retry: fast_retry(),
                ..Default::default()
            },
            cache: config::CacheConfig::default(),
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        // Initialize app state
        let state = AppState::new(config).unwrap();

        // Create HTTP client
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = pollution_aggregator::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: addr_str,
            state,
            upstream,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Accept the configured credentials
    pub async fn mount_login(&self) {
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "access-token",
                "refreshToken": "refresh-token",
                "expiresIn": 3600,
            })))
            .mount(&self.upstream)
            .await;
    }

    /// Serve `body` for `country`, expecting exactly `calls` data requests
    pub async fn mount_pollution(&self, country: &str, body: serde_json::Value, calls: u64) {
        Mock::given(method("GET"))
            .and(path("/pollution"))
            .and(query_param("country", country))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(calls)
            .mount(&self.upstream)
            .await;
    }

    /// Serve a summary for `city`
    pub async fn mount_summary(&self, city: &str, extract: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/wiki/page/summary/{city}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "extract": extract,
            })))
            .mount(&self.upstream)
            .await;
    }

    /// Confirm that no summary exists for `city`
    pub async fn mount_missing_summary(&self, city: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/wiki/page/summary/{city}")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&self.upstream)
            .await;
    }
}

fn fast_retry() -> config::RetryConfig {
    config::RetryConfig {
        max_attempts: 2,
        base_delay_ms: 1,
        factor: 2.0,
        max_delay_ms: 2,
        jitter: false,
    }
}
