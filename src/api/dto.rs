//! API response DTOs

use serde::Serialize;

use crate::data::{CitiesPage, CityRecord, Country};

/// One city in a cities page
#[derive(Debug, Clone, Serialize)]
pub struct CityResponse {
    pub name: String,
    /// Display name, e.g. "Poland"
    pub country: String,
    pub pollution: f64,
    pub description: Option<String>,
}

/// Response of GET /cities
#[derive(Debug, Clone, Serialize)]
pub struct CitiesResponse {
    pub page: usize,
    pub limit: usize,
    /// Number of cities before pagination
    pub total: usize,
    pub cities: Vec<CityResponse>,
}

impl CityResponse {
    fn from_record(record: CityRecord, country: Country) -> Self {
        Self {
            name: record.name,
            country: country.display_name().to_string(),
            pollution: record.pollution,
            description: record.description,
        }
    }
}

impl From<CitiesPage> for CitiesResponse {
    fn from(page: CitiesPage) -> Self {
        let country = page.country;
        Self {
            page: page.page,
            limit: page.limit,
            total: page.total,
            cities: page
                .cities
                .into_iter()
                .map(|record| CityResponse::from_record(record, country))
                .collect(),
        }
    }
}
