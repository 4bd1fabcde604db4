//! In-memory result caches
//!
//! These caches are volatile and cleared on restart. Both namespaces are
//! keyed by country and share a single TTL.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use super::models::{CityRecord, Country};
use crate::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL, CACHE_SIZE};

/// Cached value with its absolute expiry
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    expires_at: Instant,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// TTL map guarded by one lock
///
/// Reads of an expired entry remove it and report a miss.
struct TtlMap<K, V> {
    name: &'static str,
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    ttl: Duration,
}

impl<K, V> TtlMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    async fn get(&self, key: &K) -> Option<V> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(Instant::now()) => {
                    CACHE_HITS_TOTAL.with_label_values(&[self.name]).inc();
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    CACHE_MISSES_TOTAL.with_label_values(&[self.name]).inc();
                    return None;
                }
            }
        }

        // Expired: re-check under the write lock, a writer may have refreshed it.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key) {
            if !entry.is_expired(Instant::now()) {
                CACHE_HITS_TOTAL.with_label_values(&[self.name]).inc();
                return Some(entry.value.clone());
            }
            entries.remove(key);
            tracing::debug!(cache = self.name, "Evicted expired cache entry on read");
        }
        CACHE_MISSES_TOTAL.with_label_values(&[self.name]).inc();
        self.record_size(entries.len());
        None
    }

    async fn insert(&self, key: K, value: V) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
        self.record_size(entries.len());
    }

    /// Replace the value for `key` with `merge(current)` atomically
    ///
    /// An expired current value is passed as `None`. The merged value gets a
    /// fresh expiry.
    async fn upsert(&self, key: K, merge: impl FnOnce(Option<V>) -> V) {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let current = entries
            .remove(&key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value);

        entries.insert(
            key,
            CacheEntry {
                value: merge(current),
                expires_at: now + self.ttl,
            },
        );
        self.record_size(entries.len());
    }

    async fn remove(&self, key: &K) {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        self.record_size(entries.len());
    }

    async fn sweep(&self) -> usize {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        self.record_size(entries.len());
        before - entries.len()
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    fn record_size(&self, size: usize) {
        CACHE_SIZE.with_label_values(&[self.name]).set(size as i64);
    }
}

/// Two-tier result cache
///
/// - cities: enriched, sorted city list per country
/// - unenrichable: lower-cased names known to have no summary, per country
pub struct ResultCache {
    cities: TtlMap<Country, Arc<Vec<CityRecord>>>,
    unenrichable: TtlMap<Country, HashSet<String>>,
}

impl ResultCache {
    /// Create new result cache
    ///
    /// # Arguments
    /// * `ttl` - Lifetime of every entry in both namespaces
    pub fn new(ttl: Duration) -> Self {
        Self {
            cities: TtlMap::new("cities", ttl),
            unenrichable: TtlMap::new("unenrichable", ttl),
        }
    }

    /// Enriched city list for `country`, if cached and fresh
    pub async fn cities(&self, country: Country) -> Option<Arc<Vec<CityRecord>>> {
        self.cities.get(&country).await
    }

    pub async fn store_cities(&self, country: Country, cities: Arc<Vec<CityRecord>>) {
        self.cities.insert(country, cities).await;
    }

    /// Drop the city list so the next request re-fetches
    pub async fn invalidate_cities(&self, country: Country) {
        self.cities.remove(&country).await;
    }

    /// Names (lower-cased) known to have no summary for `country`
    pub async fn unenrichable(&self, country: Country) -> HashSet<String> {
        self.unenrichable.get(&country).await.unwrap_or_default()
    }

    /// Union `names` into the unenrichable set for `country`
    ///
    /// Names are lower-cased. An empty batch leaves the entry untouched.
    pub async fn record_unenrichable<I, S>(&self, country: Country, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = names
            .into_iter()
            .map(|name| name.as_ref().to_lowercase())
            .collect();
        if names.is_empty() {
            return;
        }

        tracing::debug!(
            country = %country,
            count = names.len(),
            "Recording unenrichable cities"
        );

        self.unenrichable
            .upsert(country, |current| {
                let mut merged = current.unwrap_or_default();
                merged.extend(names);
                merged
            })
            .await;
    }

    /// Remove every expired entry in both namespaces
    ///
    /// # Returns
    /// Number of entries removed
    pub async fn sweep(&self) -> usize {
        self.cities.sweep().await + self.unenrichable.sweep().await
    }

    /// Number of stored entries (expired ones included until swept)
    pub async fn len(&self) -> usize {
        self.cities.len().await + self.unenrichable.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn city(name: &str, pollution: f64) -> CityRecord {
        CityRecord {
            name: name.to_string(),
            original_name: name.to_string(),
            pollution,
            description: Some(format!("{name} is a city")),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cities_expire_after_ttl() {
        let cache = ResultCache::new(Duration::from_secs(60));
        cache
            .store_cities(Country::Poland, Arc::new(vec![city("Warsaw", 30.0)]))
            .await;

        tokio::time::advance(Duration::from_secs(59)).await;
        let cached = cache.cities(Country::Poland).await.unwrap();
        assert_eq!(cached[0].name, "Warsaw");

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.cities(Country::Poland).await.is_none());
        // expired read removed the entry
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn countries_are_independent() {
        let cache = ResultCache::new(Duration::from_secs(60));
        cache
            .store_cities(Country::Poland, Arc::new(vec![city("Warsaw", 30.0)]))
            .await;

        assert!(cache.cities(Country::Germany).await.is_none());
        cache.invalidate_cities(Country::Poland).await;
        assert!(cache.cities(Country::Poland).await.is_none());
    }

    #[tokio::test]
    async fn unenrichable_union_is_idempotent() {
        let cache = ResultCache::new(Duration::from_secs(60));

        cache
            .record_unenrichable(Country::Poland, ["Lodz", "Opole"])
            .await;
        cache.record_unenrichable(Country::Poland, ["lodz"]).await;

        let names = cache.unenrichable(Country::Poland).await;
        assert_eq!(names.len(), 2);
        assert!(names.contains("lodz"));
        assert!(names.contains("opole"));
        assert!(cache.unenrichable(Country::Germany).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unenrichable_merge_refreshes_expiry_and_drops_stale_names() {
        let cache = ResultCache::new(Duration::from_secs(60));
        cache.record_unenrichable(Country::Spain, ["Ceuta"]).await;

        tokio::time::advance(Duration::from_secs(40)).await;
        cache.record_unenrichable(Country::Spain, ["Melilla"]).await;

        tokio::time::advance(Duration::from_secs(40)).await;
        let names = cache.unenrichable(Country::Spain).await;
        assert!(names.contains("ceuta"));
        assert!(names.contains("melilla"));

        tokio::time::advance(Duration::from_secs(61)).await;
        cache.record_unenrichable(Country::Spain, ["Toledo"]).await;
        let names = cache.unenrichable(Country::Spain).await;
        assert_eq!(names.len(), 1);
        assert!(names.contains("toledo"));
    }

    #[tokio::test]
    async fn empty_batch_does_not_create_entry() {
        let cache = ResultCache::new(Duration::from_secs(60));
        cache
            .record_unenrichable(Country::France, Vec::<String>::new())
            .await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_only_expired_entries() {
        let cache = ResultCache::new(Duration::from_secs(60));
        cache
            .store_cities(Country::Poland, Arc::new(vec![city("Warsaw", 30.0)]))
            .await;
        cache.record_unenrichable(Country::Poland, ["Lodz"]).await;

        tokio::time::advance(Duration::from_secs(30)).await;
        cache
            .store_cities(Country::France, Arc::new(vec![city("Paris", 50.0)]))
            .await;

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.sweep().await, 2);
        assert_eq!(cache.len().await, 1);
        assert!(cache.cities(Country::France).await.is_some());
    }
}
