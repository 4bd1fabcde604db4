//! Record processing
//!
//! Pure, deterministic stages applied to one country's batch:
//! normalize → deduplicate → filter → sort.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use lazy_static::lazy_static;
use regex::Regex;

use crate::data::{CityRecord, RawCityRecord};

/// Names shorter than this are dropped
const MIN_NAME_CHARS: usize = 2;

lazy_static! {
    static ref PARENTHETICAL: Regex = Regex::new(r"\(.*?\)").expect("valid parenthetical regex");
    static ref DISALLOWED: Regex = Regex::new(r"[^a-zA-Z\s-]").expect("valid character regex");
}

/// Normalize a raw city name
///
/// Transliterates to ASCII, drops parenthetical annotations and anything
/// that is not a letter, whitespace or hyphen, collapses whitespace and
/// title-cases each word. Idempotent.
///
/// ```
/// use pollution_aggregator::service::normalize_city_name;
///
/// assert_eq!(normalize_city_name("  ŁÓDŹ (city) "), "Lodz");
/// assert_eq!(normalize_city_name("bielsko-biała"), "Bielsko-biala");
/// ```
pub fn normalize_city_name(raw: &str) -> String {
    let ascii = deunicode::deunicode(raw.trim());
    let without_annotations = PARENTHETICAL.replace_all(&ascii, "");
    let letters = DISALLOWED.replace_all(&without_annotations, "");

    letters
        .split_whitespace()
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// Stage 1: normalize names, keeping the raw name alongside
pub fn normalize(raw: Vec<RawCityRecord>) -> Vec<CityRecord> {
    raw.into_iter()
        .map(|record| {
            let original_name = record.raw_name().unwrap_or_default().to_string();
            CityRecord {
                name: normalize_city_name(&original_name),
                original_name,
                pollution: record.pollution,
                description: None,
            }
        })
        .collect()
}

/// Stage 2: one record per normalized name, highest pollution wins
///
/// Exact ties keep the first record seen. Groups stay in the order their
/// name first appeared.
pub fn deduplicate(records: Vec<CityRecord>) -> Vec<CityRecord> {
    let mut index_by_name: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<CityRecord> = Vec::with_capacity(records.len());

    for record in records {
        match index_by_name.get(&record.name) {
            Some(&index) => {
                if record.pollution > unique[index].pollution {
                    unique[index] = record;
                }
            }
            None => {
                index_by_name.insert(record.name.clone(), unique.len());
                unique.push(record);
            }
        }
    }

    unique
}

/// Stage 3: drop short names and names known to be unenrichable
///
/// `unenrichable` holds lower-cased names.
pub fn filter_valid(records: Vec<CityRecord>, unenrichable: &HashSet<String>) -> Vec<CityRecord> {
    records
        .into_iter()
        .filter(|record| {
            record.name.chars().count() >= MIN_NAME_CHARS
                && !unenrichable.contains(&record.name.to_lowercase())
        })
        .collect()
}

/// Stage 4: stable sort, highest pollution first
pub fn sort_by_pollution(mut records: Vec<CityRecord>) -> Vec<CityRecord> {
    records.sort_by(|a, b| {
        b.pollution
            .partial_cmp(&a.pollution)
            .unwrap_or(Ordering::Equal)
    });
    records
}

/// Run all four stages
pub fn process(raw: Vec<RawCityRecord>, unenrichable: &HashSet<String>) -> Vec<CityRecord> {
    let normalized = normalize(raw);
    let unique = deduplicate(normalized);
    let valid = filter_valid(unique, unenrichable);
    sort_by_pollution(valid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(name: &str, pollution: f64) -> RawCityRecord {
        RawCityRecord {
            name: Some(name.to_string()),
            pollution,
            ..Default::default()
        }
    }

    fn record(name: &str, pollution: f64) -> CityRecord {
        CityRecord {
            name: name.to_string(),
            original_name: name.to_string(),
            pollution,
            description: None,
        }
    }

    #[test]
    fn normalizes_names() {
        assert_eq!(normalize_city_name("Łódź"), "Lodz");
        assert_eq!(normalize_city_name("lodz"), "Lodz");
        assert_eq!(normalize_city_name("  são   PAULO "), "Sao Paulo");
        assert_eq!(normalize_city_name("Köln (Cologne)"), "Koln");
        assert_eq!(normalize_city_name("Frankfurt am Main 2"), "Frankfurt Am Main");
        assert_eq!(normalize_city_name("Aix-en-Provence"), "Aix-en-provence");
        assert_eq!(normalize_city_name("(unknown)"), "");
        assert_eq!(normalize_city_name(""), "");
    }

    #[test]
    fn normalization_is_idempotent() {
        for name in [
            "Łódź",
            "  são   PAULO ",
            "Köln (Cologne)",
            "Aix-en-Provence",
            "A Coruña",
            "Saint-Étienne",
            "Zürich!!",
            "Gdańsk station 4",
        ] {
            let once = normalize_city_name(name);
            assert_eq!(normalize_city_name(&once), once, "not idempotent for {name}");
        }
    }

    #[test]
    fn normalize_keeps_original_and_defaults_missing_name() {
        let records = normalize(vec![
            raw("Łódź", 45.2),
            RawCityRecord {
                pollution: 10.0,
                ..Default::default()
            },
        ]);

        assert_eq!(records[0].name, "Lodz");
        assert_eq!(records[0].original_name, "Łódź");
        assert_eq!(records[1].name, "");
        assert_eq!(records[1].original_name, "");
    }

    #[test]
    fn deduplicate_keeps_max_and_first_on_ties() {
        let mut first = record("Lodz", 80.0);
        first.original_name = "first".to_string();
        let mut tie = record("Lodz", 80.0);
        tie.original_name = "tie".to_string();

        let unique = deduplicate(vec![
            record("Lodz", 45.2),
            record("Warsaw", 30.0),
            first,
            tie,
            record("Warsaw", 10.0),
        ]);

        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].name, "Lodz");
        assert_eq!(unique[0].pollution, 80.0);
        assert_eq!(unique[0].original_name, "first");
        assert_eq!(unique[1].name, "Warsaw");
        assert_eq!(unique[1].pollution, 30.0);
    }

    #[test]
    fn filter_drops_short_and_unenrichable_names() {
        let unenrichable: HashSet<String> = ["warsaw".to_string()].into_iter().collect();

        let valid = filter_valid(
            vec![
                record("", 1.0),
                record("A", 2.0),
                record("Warsaw", 3.0),
                record("Ab", 4.0),
                record("Krakow", 5.0),
            ],
            &unenrichable,
        );

        let names: Vec<_> = valid.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Ab", "Krakow"]);
    }

    #[test]
    fn sort_is_descending_and_stable() {
        let mut a = record("Alpha", 10.0);
        a.original_name = "a".to_string();
        let mut b = record("Beta", 10.0);
        b.original_name = "b".to_string();

        let sorted = sort_by_pollution(vec![a, record("Gamma", 50.0), b, record("Delta", 0.0)]);

        let names: Vec<_> = sorted.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Gamma", "Alpha", "Beta", "Delta"]);
        assert!(sorted.windows(2).all(|w| w[0].pollution >= w[1].pollution));
    }

    #[test]
    fn lodz_scenario() {
        let batch: Vec<RawCityRecord> = serde_json::from_value(serde_json::json!([
            { "name": "Łódź", "pollution": "45.2" },
            { "name": "lodz", "pollution": "80" },
            { "name": "Warsaw", "pollution": "30" },
        ]))
        .unwrap();

        let processed = process(batch, &HashSet::new());

        assert_eq!(processed.len(), 2);
        assert_eq!(processed[0].name, "Lodz");
        assert_eq!(processed[0].pollution, 80.0);
        assert_eq!(processed[0].original_name, "lodz");
        assert_eq!(processed[1].name, "Warsaw");
        assert_eq!(processed[1].pollution, 30.0);
    }

    #[test]
    fn process_is_deterministic() {
        let batch = vec![
            raw("Paris", 40.0),
            raw("paris", 42.0),
            raw("Lyon", 42.0),
            raw("Nice", 12.0),
            raw("X", 99.0),
        ];

        let first = process(batch.clone(), &HashSet::new());
        let second = process(batch, &HashSet::new());
        assert_eq!(first, second);

        let names: Vec<_> = first.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Paris", "Lyon", "Nice"]);
    }
}
