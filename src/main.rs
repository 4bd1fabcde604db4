//! Pollution Aggregator binary entry point

use pollution_aggregator::{AppState, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Load configuration from file and environment
/// 2. Initialize tracing/logging
/// 3. Initialize AppState
/// 4. Build Axum router
/// 5. Start background tasks (cache sweep)
/// 6. Start HTTP server
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration
    let config = config::AppConfig::load()?;

    // 2. Initialize tracing/logging
    let default_filter = format!(
        "pollution_aggregator={},tower_http=debug",
        config.logging.level
    );

    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| default_filter.clone().into()),
            )
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| default_filter.clone().into()),
            )
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting Pollution Aggregator...");
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        "Configuration loaded"
    );

    pollution_aggregator::metrics::init_metrics();

    // 3. Initialize application state
    let state = AppState::new(config.clone())?;

    // 4. Build Axum router
    let app = pollution_aggregator::build_router(state.clone());

    // 5. Start background tasks
    spawn_cache_sweep_task(state);

    // 6. Start HTTP server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Spawn background task evicting expired cache entries
fn spawn_cache_sweep_task(state: AppState) {
    let configured_interval_secs = state.config.cache.sweep_interval_seconds;
    if configured_interval_secs == 0 {
        tracing::debug!("cache.sweep_interval_seconds=0; expired entries are evicted on read only");
        return;
    }

    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(configured_interval_secs));

        // Consume the immediate first tick; the cache is empty at startup.
        interval.tick().await;

        loop {
            interval.tick().await;

            let removed = state.cache.sweep().await;
            if removed > 0 {
                tracing::info!(removed, "Evicted expired cache entries");
            } else {
                tracing::debug!("Cache sweep found nothing to evict");
            }
        }
    });

    tracing::info!("Cache sweep task spawned");
}
