//! Domain models

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

use crate::error::AppError;

/// Supported countries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Country {
    Poland,
    Germany,
    Spain,
    France,
}

impl Country {
    pub const ALL: [Country; 4] = [
        Country::Poland,
        Country::Germany,
        Country::Spain,
        Country::France,
    ];

    /// ISO 3166-1 alpha-2 code sent upstream
    pub fn code(self) -> &'static str {
        match self {
            Country::Poland => "PL",
            Country::Germany => "DE",
            Country::Spain => "ES",
            Country::France => "FR",
        }
    }

    /// Human-readable name shown to callers
    pub fn display_name(self) -> &'static str {
        match self {
            Country::Poland => "Poland",
            Country::Germany => "Germany",
            Country::Spain => "Spain",
            Country::France => "France",
        }
    }
}

impl fmt::Display for Country {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Country {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let code = value.trim().to_ascii_uppercase();
        Country::ALL
            .into_iter()
            .find(|country| country.code() == code)
            .ok_or_else(|| {
                let supported = Country::ALL
                    .iter()
                    .map(|c| format!("{} ({})", c.code(), c.display_name()))
                    .collect::<Vec<_>>()
                    .join(", ");
                AppError::Validation(format!(
                    "Invalid country code. Supported countries: {supported}"
                ))
            })
    }
}

/// One element of the upstream results array, as received
///
/// Some upstream versions send the name under `city`; both keys may be
/// present, in which case `name` wins (see `raw_name`).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawCityRecord {
    #[serde(default, deserialize_with = "lenient_name")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_name")]
    pub city: Option<String>,
    /// Numbers and numeric strings are accepted; anything else reads as 0
    #[serde(default, deserialize_with = "lenient_reading")]
    pub pollution: f64,
}

impl RawCityRecord {
    /// Name as received, preferring `name` over `city`
    pub fn raw_name(&self) -> Option<&str> {
        self.name.as_deref().or(self.city.as_deref())
    }
}

/// City after normalization, optionally enriched
#[derive(Debug, Clone, PartialEq)]
pub struct CityRecord {
    /// Normalized, display-cased name
    pub name: String,
    /// Name as received from upstream
    pub original_name: String,
    pub pollution: f64,
    pub description: Option<String>,
}

/// One page of the enriched, sorted list for a country
#[derive(Debug, Clone, PartialEq)]
pub struct CitiesPage {
    pub country: Country,
    pub page: usize,
    pub limit: usize,
    /// Length of the full list before pagination
    pub total: usize,
    pub cities: Vec<CityRecord>,
}

fn lenient_name<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(name) => Some(name),
        _ => None,
    })
}

fn lenient_reading<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(parse_reading(&value))
}

/// Parse a pollution reading, falling back to 0
pub fn parse_reading(value: &serde_json::Value) -> f64 {
    let reading = match value {
        serde_json::Value::Number(number) => number.as_f64(),
        serde_json::Value::String(text) => leading_number(text.trim()),
        _ => None,
    };
    reading.filter(|r| r.is_finite()).unwrap_or(0.0)
}

/// Longest numeric prefix of `text`, e.g. "45.2 µg/m³" -> 45.2, "4.5e1" -> 45
fn leading_number(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    let mut end = 0;
    let mut seen_dot = false;
    let mut seen_digit = false;

    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }

    while let Some(&byte) = bytes.get(end) {
        match byte {
            b'0'..=b'9' => seen_digit = true,
            b'.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end += 1;
    }

    if !seen_digit {
        return None;
    }

    // Exponent only counts when at least one digit follows it.
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exponent_end = end + 1;
        if matches!(bytes.get(exponent_end), Some(b'+' | b'-')) {
            exponent_end += 1;
        }
        let digits_start = exponent_end;
        while matches!(bytes.get(exponent_end), Some(b'0'..=b'9')) {
            exponent_end += 1;
        }
        if exponent_end > digits_start {
            end = exponent_end;
        }
    }

    text[..end].parse().ok()
}
