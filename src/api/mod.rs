//! API layer
//!
//! HTTP handlers for:
//! - Cities (most polluted cities per country)
//! - Metrics (Prometheus)

mod cities;
mod dto;
pub mod metrics;

pub use dto::*;

pub use cities::cities_router;
pub use metrics::metrics_router;
