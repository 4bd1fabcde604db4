//! Cities endpoints
//!
//! - GET /cities?country=PL&page=1&limit=10

use axum::{
    Router,
    extract::{Query, State},
    response::Json,
    routing::get,
};
use serde::Deserialize;

use super::dto::CitiesResponse;
use crate::AppState;
use crate::data::Country;
use crate::error::AppError;
use crate::service::CacheMode;

const DEFAULT_PAGE: usize = 1;
const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 100;

/// Create cities router
///
/// Routes:
/// - GET /cities
pub fn cities_router() -> Router<AppState> {
    Router::new().route("/cities", get(most_polluted_cities))
}

/// Query parameters
///
/// Kept as strings so malformed numbers fall back to defaults instead of
/// rejecting the request.
#[derive(Debug, Deserialize)]
struct CitiesQuery {
    country: Option<String>,
    page: Option<String>,
    limit: Option<String>,
    refresh: Option<String>,
}

/// Validated request parameters
#[derive(Debug, PartialEq, Eq)]
struct CitiesRequest {
    country: Country,
    page: usize,
    limit: usize,
    mode: CacheMode,
}

impl TryFrom<CitiesQuery> for CitiesRequest {
    type Error = AppError;

    fn try_from(query: CitiesQuery) -> Result<Self, Self::Error> {
        let country = query.country.as_deref().unwrap_or_default().parse()?;
        let page = positive_or(query.page.as_deref(), DEFAULT_PAGE);
        let limit = positive_or(query.limit.as_deref(), DEFAULT_LIMIT).min(MAX_LIMIT);
        let mode = match query.refresh.as_deref() {
            Some("true") | Some("1") => CacheMode::Refresh,
            _ => CacheMode::Cached,
        };

        Ok(Self {
            country,
            page,
            limit,
            mode,
        })
    }
}

fn positive_or(value: Option<&str>, default: usize) -> usize {
    value
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|v| *v >= 1)
        .unwrap_or(default)
}

/// GET /cities
///
/// Returns the most polluted cities of a country, enriched with a short
/// description, sorted by pollution descending.
///
/// Query: ?country=PL&page=1&limit=10
async fn most_polluted_cities(
    State(state): State<AppState>,
    Query(query): Query<CitiesQuery>,
) -> Result<Json<CitiesResponse>, AppError> {
    let request = CitiesRequest::try_from(query)?;

    let page = state
        .aggregator
        .most_polluted(request.country, request.page, request.limit, request.mode)
        .await?;

    Ok(Json(page.into()))
}
