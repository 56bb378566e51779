use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;

use crate::gateway::{Coordinates, ForecastSeries, GatewayError, Units, WeatherSnapshot};

/// Operation a cache entry was produced by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Current,
    Forecast,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Forecast => "forecast",
        }
    }
}

/// Composite key: (operation kind, location identifier, unit system, language)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: QueryKind,
    pub location: String,
    pub units: Units,
    pub language: String,
}

impl CacheKey {
    pub fn current_city(city: &str, units: Units, language: &str) -> Self {
        Self {
            kind: QueryKind::Current,
            location: normalize_cache_key(city),
            units,
            language: normalize_cache_key(language),
        }
    }

    pub fn current_coordinates(coord: Coordinates, units: Units, language: &str) -> Self {
        Self {
            kind: QueryKind::Current,
            location: coord.cache_id(),
            units,
            language: normalize_cache_key(language),
        }
    }

    pub fn forecast(coord: Coordinates, units: Units, language: &str) -> Self {
        Self {
            kind: QueryKind::Forecast,
            location: coord.cache_id(),
            units,
            language: normalize_cache_key(language),
        }
    }

    /// Prefix matching every entry of one kind
    pub fn kind_prefix(kind: QueryKind) -> String {
        format!("{}|", kind.as_str())
    }

    /// Prefix matching every entry of one kind for one location
    pub fn location_prefix(kind: QueryKind, location: &str) -> String {
        format!("{}|{}|", kind.as_str(), normalize_cache_key(location))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}",
            self.kind.as_str(),
            self.location,
            self.units.as_str(),
            self.language
        )
    }
}

/// Value held by the cache
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Current(WeatherSnapshot),
    Forecast(ForecastSeries),
}

impl CachedValue {
    pub fn into_current(self) -> Option<WeatherSnapshot> {
        match self {
            Self::Current(snapshot) => Some(snapshot),
            Self::Forecast(_) => None,
        }
    }

    pub fn into_forecast(self) -> Option<ForecastSeries> {
        match self {
            Self::Forecast(series) => Some(series),
            Self::Current(_) => None,
        }
    }
}

/// Freshness window per operation kind
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreshnessTable {
    pub current: Duration,
    pub forecast: Duration,
}

impl FreshnessTable {
    pub fn window(&self, kind: QueryKind) -> Duration {
        match kind {
            QueryKind::Current => self.current,
            QueryKind::Forecast => self.forecast,
        }
    }
}

impl Default for FreshnessTable {
    fn default() -> Self {
        Self {
            current: Duration::from_secs(10 * 60),
            forecast: Duration::from_secs(30 * 60),
        }
    }
}

struct CacheEntry {
    value: CachedValue,
    fetched_at: Instant,
    fresh_for: Duration,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.fetched_at) < self.fresh_for
    }
}

type PendingFetch = Shared<BoxFuture<'static, Result<CachedValue, GatewayError>>>;

struct CacheInner {
    entries: DashMap<String, CacheEntry>,
    in_flight: DashMap<String, PendingFetch>,
    freshness: FreshnessTable,
}

impl CacheInner {
    fn fresh(&self, id: &str) -> Option<CachedValue> {
        let entry = self.entries.get(id)?;
        if entry.is_fresh(Instant::now()) {
            Some(entry.value.clone())
        } else {
            drop(entry);
            self.entries.remove(id);
            None
        }
    }

    fn insert(&self, id: String, value: CachedValue, fresh_for: Duration) {
        self.entries.insert(
            id,
            CacheEntry {
                value,
                fetched_at: Instant::now(),
                fresh_for,
            },
        );
    }
}

/// Keyed memoization over Gateway calls.
///
/// Concurrent misses for the same key share one underlying fetch. Writes are
/// last-write-wins.
#[derive(Clone)]
pub struct RequestCache {
    inner: Arc<CacheInner>,
}

impl RequestCache {
    pub fn new(freshness: FreshnessTable) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: DashMap::new(),
                in_flight: DashMap::new(),
                freshness,
            }),
        }
    }

    pub fn freshness(&self) -> FreshnessTable {
        self.inner.freshness
    }

    /// Cached value if present and inside its freshness window
    pub fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        let id = key.to_string();
        match self.inner.fresh(&id) {
            Some(value) => {
                tracing::debug!(key = %id, "Request cache hit");
                metrics::counter!("citycast_cache_hits_total").increment(1);
                Some(value)
            }
            None => {
                tracing::debug!(key = %id, "Request cache miss");
                metrics::counter!("citycast_cache_misses_total").increment(1);
                None
            }
        }
    }

    /// Store a value with an explicit freshness window
    pub fn set(&self, key: &CacheKey, value: CachedValue, fresh_for: Duration) {
        self.inner.insert(key.to_string(), value, fresh_for);
    }

    /// Store a value using the window configured for its kind
    pub fn put(&self, key: &CacheKey, value: CachedValue) {
        self.set(key, value, self.inner.freshness.window(key.kind));
    }

    /// Remove every entry whose key starts with `prefix`; returns the count removed
    pub fn invalidate(&self, prefix: &str) -> usize {
        let before = self.inner.entries.len();
        self.inner.entries.retain(|id, _| !id.starts_with(prefix));
        let removed = before.saturating_sub(self.inner.entries.len());
        tracing::debug!(prefix = %prefix, removed = removed, "Request cache invalidated");
        removed
    }

    pub fn clear(&self) {
        self.inner.entries.clear();
        tracing::info!("Request cache cleared");
    }

    /// Remove expired entries
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.inner.entries.retain(|_, entry| entry.is_fresh(now));
    }

    /// Number of stored entries (including expired ones)
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Return the cached value, or run `fetch` exactly once for this key.
    ///
    /// Callers arriving while a fetch for the same key is pending await that
    /// fetch instead of issuing their own. Successful results are stored with
    /// the kind's freshness window; failures are not cached.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &CacheKey,
        fetch: F,
    ) -> Result<CachedValue, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachedValue, GatewayError>> + Send + 'static,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let id = key.to_string();
        let pending = match self.inner.in_flight.entry(id.clone()) {
            Entry::Occupied(slot) => {
                tracing::debug!(key = %id, "Joining in-flight fetch");
                slot.get().clone()
            }
            Entry::Vacant(slot) => {
                // A fetch may have completed between the miss and taking the slot
                if let Some(value) = self.inner.fresh(&id) {
                    return Ok(value);
                }

                let inner = Arc::clone(&self.inner);
                let fresh_for = inner.freshness.window(key.kind);
                let request = fetch();
                let owned_id = id.clone();

                let pending = async move {
                    let outcome = request.await;
                    if let Ok(value) = &outcome {
                        inner.insert(owned_id.clone(), value.clone(), fresh_for);
                    }
                    inner.in_flight.remove(&owned_id);
                    outcome
                }
                .boxed()
                .shared();

                slot.insert(pending.clone());
                pending
            }
        };

        pending.await
    }
}

/// Normalize a location string for cache key
/// Converts to lowercase and trims whitespace
pub fn normalize_cache_key(location: &str) -> String {
    location.trim().to_lowercase()
}

/// Start a background task that evicts expired cache entries
pub fn start_cache_cleanup_task(cache: RequestCache, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let before = cache.len();
            cache.cleanup();
            let after = cache.len();
            if before != after {
                tracing::debug!(
                    removed = before - after,
                    remaining = after,
                    "Request cache cleanup completed"
                );
            }
        }
    });
}
