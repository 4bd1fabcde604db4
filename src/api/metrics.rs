//! Prometheus metrics endpoint
//!
//! - GET /metrics

use axum::{
    Router,
    http::header::CONTENT_TYPE,
    response::IntoResponse,
    routing::get,
};
use prometheus::{Encoder, TextEncoder};

use crate::error::AppError;
use crate::metrics::REGISTRY;

/// Create metrics router
///
/// Stateless, so it merges into a router of any state type.
pub fn metrics_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/metrics", get(render_metrics))
}

/// GET /metrics
///
/// Upstream calls, retries, session exchanges, enrichment outcomes, cache
/// hit rates and returned errors in Prometheus text format.
async fn render_metrics() -> Result<impl IntoResponse, AppError> {
    let encoder = TextEncoder::new();
    let body = encoder
        .encode_to_string(&REGISTRY.gather())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to encode metrics: {e}")))?;

    Ok(([(CONTENT_TYPE, encoder.format_type().to_string())], body))
}
