//! Aggregation service
//!
//! Composes the pollution source, record processing, enrichment and the
//! result cache into the "most polluted cities" pipeline.

use std::sync::Arc;

use futures::stream::{self, StreamExt};

use super::processor;
use crate::data::{CitiesPage, CityRecord, Country, ResultCache};
use crate::error::AppError;
use crate::upstream::{EnrichmentClient, EnrichmentOutcome, PollutionClient};

/// Whether a request may be served from the cached city list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    #[default]
    Cached,
    /// Drop the cached list and run the full pipeline again
    Refresh,
}

/// Aggregation service
pub struct Aggregator {
    pollution: Arc<PollutionClient>,
    enrichment: Arc<EnrichmentClient>,
    cache: Arc<ResultCache>,
    /// Enrichment lookups in flight per request
    concurrency: usize,
}

impl Aggregator {
    /// Create new aggregation service
    pub fn new(
        pollution: Arc<PollutionClient>,
        enrichment: Arc<EnrichmentClient>,
        cache: Arc<ResultCache>,
        concurrency: usize,
    ) -> Self {
        Self {
            pollution,
            enrichment,
            cache,
            concurrency: concurrency.max(1),
        }
    }

    /// Get one page of the most polluted, enriched cities of `country`
    ///
    /// # Arguments
    /// * `page` - 1-based page number
    /// * `limit` - Page size
    /// * `mode` - Whether the cached list may be used
    ///
    /// # Errors
    /// - `AppError::NotFound` if upstream has no data for the country
    /// - `AppError::Auth` if no upstream session could be established
    pub async fn most_polluted(
        &self,
        country: Country,
        page: usize,
        limit: usize,
        mode: CacheMode,
    ) -> Result<CitiesPage, AppError> {
        if mode == CacheMode::Refresh {
            self.cache.invalidate_cities(country).await;
        }

        let cities = match self.cache.cities(country).await {
            Some(cities) => {
                tracing::debug!(country = %country, "Serving cities from cache");
                cities
            }
            None => self.rebuild(country).await?,
        };

        Ok(paginate(country, &cities, page, limit))
    }

    /// Fetch, process, enrich and cache the full list for `country`
    async fn rebuild(&self, country: Country) -> Result<Arc<Vec<CityRecord>>, AppError> {
        let batch = self.pollution.fetch(country).await?;

        if batch.results.is_empty() {
            tracing::warn!(country = %country, "No pollution data found");
            return Err(AppError::NotFound(format!(
                "No pollution data found for country: {}",
                country.code()
            )));
        }

        let received = batch.results.len();
        let unenrichable = self.cache.unenrichable(country).await;
        let candidates = processor::process(batch.results, &unenrichable);

        tracing::info!(
            country = %country,
            received,
            candidates = candidates.len(),
            "Processed pollution data"
        );

        let enriched = Arc::new(self.enrich(country, candidates).await);
        self.cache.store_cities(country, Arc::clone(&enriched)).await;

        Ok(enriched)
    }

    /// Attach summaries, keeping only cities that got one
    ///
    /// Lookups run concurrently but results are consumed in input order, so
    /// the sort order is preserved. Confirmed misses are remembered in the
    /// unenrichable cache; transient failures are not.
    async fn enrich(&self, country: Country, cities: Vec<CityRecord>) -> Vec<CityRecord> {
        let enrichment = &self.enrichment;

        let outcomes: Vec<(CityRecord, EnrichmentOutcome)> = stream::iter(cities)
            .map(|city| async move {
                let outcome = enrichment.lookup(&city.name, country).await;
                (city, outcome)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut enriched = Vec::with_capacity(outcomes.len());
        let mut missing = Vec::new();
        let mut unavailable = 0usize;

        for (mut city, outcome) in outcomes {
            match outcome {
                EnrichmentOutcome::Found(description) => {
                    city.description = Some(description);
                    enriched.push(city);
                }
                EnrichmentOutcome::Missing => missing.push(city.name.to_lowercase()),
                EnrichmentOutcome::Unavailable => unavailable += 1,
            }
        }

        tracing::info!(
            country = %country,
            enriched = enriched.len(),
            missing = missing.len(),
            unavailable,
            "Enrichment finished"
        );

        self.cache.record_unenrichable(country, missing).await;
        enriched
    }
}

/// Slice `cities` into page `page` of size `limit`
///
/// `total` is the length before slicing. Pages past the end are empty.
pub fn paginate(country: Country, cities: &[CityRecord], page: usize, limit: usize) -> CitiesPage {
    let start = page.saturating_sub(1).saturating_mul(limit).min(cities.len());
    let end = start.saturating_add(limit).min(cities.len());

    CitiesPage {
        country,
        page,
        limit,
        total: cities.len(),
        cities: cities[start..end].to_vec(),
    }
}
