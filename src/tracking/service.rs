use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use axum::http::StatusCode;
use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};

use super::models::{parse_city_query, RefreshProgress, RefreshReport, TrackedCity};
use super::refresh::{BatchRefresher, RefreshSettings};
use crate::cache::{CacheKey, CachedValue, QueryKind, RequestCache};
use crate::error::HttpError;
use crate::gateway::{GatewayError, Units, WeatherGateway};
use crate::store::{DurableStore, StoreError};

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("City name must not be empty")]
    EmptyName,

    #[error("{name}, {country} is already tracked")]
    Duplicate { name: String, country: String },

    #[error("Tracked city not found: {0}")]
    NotFound(i64),

    #[error("Failed to fetch weather for {city}: {source}")]
    Gateway {
        city: String,
        #[source]
        source: GatewayError,
    },

    #[error("A refresh is already running")]
    RefreshInProgress,

    #[error("Failed to persist tracked cities: {0}")]
    Storage(#[from] StoreError),
}

impl HttpError for TrackingError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::EmptyName => StatusCode::BAD_REQUEST,
            Self::Duplicate { .. } | Self::RefreshInProgress => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Gateway { source, .. } => source.status_code(),
            Self::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::EmptyName => Some("EMPTY_CITY_NAME"),
            Self::Duplicate { .. } => Some("DUPLICATE_CITY"),
            Self::NotFound(_) => Some("TRACKED_CITY_NOT_FOUND"),
            Self::Gateway { source, .. } => source.error_code(),
            Self::RefreshInProgress => Some("REFRESH_IN_PROGRESS"),
            Self::Storage(_) => Some("STORE_UNAVAILABLE"),
        }
    }
}

crate::impl_into_response!(TrackingError);

/// Owner of the tracked-city collection.
///
/// Every mutation goes through here so that (name, country) uniqueness and
/// non-decreasing refresh timestamps hold at each write.
pub struct TrackingService {
    cities: RwLock<Vec<TrackedCity>>,
    gateway: Arc<dyn WeatherGateway>,
    cache: RequestCache,
    store: DurableStore,
    refresher: BatchRefresher,
    progress: watch::Sender<RefreshProgress>,
    refresh_lock: Mutex<()>,
    last_id: AtomicI64,
}

impl TrackingService {
    /// Create the service with the collection currently in the store
    pub fn new(
        gateway: Arc<dyn WeatherGateway>,
        cache: RequestCache,
        store: DurableStore,
        settings: RefreshSettings,
    ) -> Self {
        let cities = store.load_entities();
        let last_id = cities.iter().map(|c| c.id).max().unwrap_or(0);
        let (progress, _) = watch::channel(RefreshProgress::default());

        tracing::info!(count = cities.len(), "Tracking service initialized");

        Self {
            cities: RwLock::new(cities),
            refresher: BatchRefresher::new(gateway.clone(), cache.clone(), settings),
            gateway,
            cache,
            store,
            progress,
            refresh_lock: Mutex::new(()),
            last_id: AtomicI64::new(last_id),
        }
    }

    pub async fn list(&self) -> Vec<TrackedCity> {
        self.cities.read().await.clone()
    }

    pub async fn get(&self, id: i64) -> Option<TrackedCity> {
        self.cities.read().await.iter().find(|c| c.id == id).cloned()
    }

    pub async fn count(&self) -> usize {
        self.cities.read().await.len()
    }

    /// Creation timestamp in milliseconds, strictly greater than any issued before
    fn next_id(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let mut last = self.last_id.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match self
                .last_id
                .compare_exchange_weak(last, candidate, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }

    /// Track a new city given as "Name" or "Name,CC".
    ///
    /// Duplicates of an already tracked city are rejected before any network call
    /// and again against the name the gateway resolved.
    pub async fn add(&self, query: &str, units: Units, lang: &str) -> Result<TrackedCity, TrackingError> {
        let (name, country) = parse_city_query(query);
        if name.is_empty() {
            return Err(TrackingError::EmptyName);
        }

        if let Some(existing) = self
            .cities
            .read()
            .await
            .iter()
            .find(|c| c.matches(name, country))
        {
            return Err(TrackingError::Duplicate {
                name: existing.name.clone(),
                country: existing.country.clone(),
            });
        }

        let query = match country {
            Some(country) => format!("{},{}", name, country),
            None => name.to_string(),
        };
        let snapshot = self
            .gateway
            .current_by_city(&query, units, lang)
            .await
            .map_err(|source| TrackingError::Gateway {
                city: query.clone(),
                source,
            })?;

        let mut cities = self.cities.write().await;
        if cities
            .iter()
            .any(|c| c.matches(&snapshot.name, Some(&snapshot.country)))
        {
            return Err(TrackingError::Duplicate {
                name: snapshot.name,
                country: snapshot.country,
            });
        }

        let city = TrackedCity::from_snapshot(self.next_id(), snapshot);
        cities.push(city.clone());

        if let Err(e) = self.store.save_entities(&cities) {
            cities.pop();
            return Err(e.into());
        }

        // Keyed by the resolved name so that removal finds it again
        if let Some(weather) = &city.weather {
            self.cache.put(
                &CacheKey::current_city(&city.query(), units, lang),
                CachedValue::Current(weather.clone()),
            );
        }

        tracing::info!(id = city.id, city = %city.name, country = %city.country, "Tracking city");
        Ok(city)
    }

    /// Stop tracking a city and drop everything cached for it
    pub async fn remove(&self, id: i64) -> Result<TrackedCity, TrackingError> {
        let removed = {
            let mut cities = self.cities.write().await;
            let index = cities
                .iter()
                .position(|c| c.id == id)
                .ok_or(TrackingError::NotFound(id))?;

            let removed = cities.remove(index);
            if let Err(e) = self.store.save_entities(&cities) {
                cities.insert(index, removed);
                return Err(e.into());
            }
            removed
        };

        let mut dropped = 0;
        for location in [removed.name.clone(), removed.query(), removed.coord.cache_id()] {
            dropped += self
                .cache
                .invalidate(&CacheKey::location_prefix(QueryKind::Current, &location));
        }
        dropped += self
            .cache
            .invalidate(&CacheKey::kind_prefix(QueryKind::Forecast));

        tracing::info!(id, city = %removed.name, cache_entries = dropped, "Stopped tracking city");
        Ok(removed)
    }

    /// Refresh a single city. Failures surface to the caller and leave it untouched.
    pub async fn refresh_city(&self, id: i64, units: Units, lang: &str) -> Result<TrackedCity, TrackingError> {
        let city = self.get(id).await.ok_or(TrackingError::NotFound(id))?;

        let updated = self
            .refresher
            .refresh_one(&city, units, lang)
            .await
            .map_err(|source| TrackingError::Gateway {
                city: city.name.clone(),
                source,
            })?;

        let mut cities = self.cities.write().await;
        let slot = cities
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(TrackingError::NotFound(id))?;

        if updated.last_updated <= slot.last_updated {
            // A newer refresh landed while this one was in flight
            return Ok(slot.clone());
        }

        let previous = std::mem::replace(slot, updated.clone());
        if let Err(e) = self.store.save_entities(&cities) {
            if let Some(slot) = cities.iter_mut().find(|c| c.id == id) {
                *slot = previous;
            }
            return Err(e.into());
        }

        tracing::info!(id, city = %updated.name, "Refreshed city");
        Ok(updated)
    }

    pub async fn refresh_all(&self, units: Units, lang: &str) -> Result<RefreshReport, TrackingError> {
        self.refresh_all_with(units, lang, |_| {}).await
    }

    /// Refresh every tracked city in paced batches.
    ///
    /// Only fails when the run cannot start: another run is active or the store
    /// is unavailable. `observer` sees each batch's progress and the final reset.
    pub async fn refresh_all_with<F>(
        &self,
        units: Units,
        lang: &str,
        mut observer: F,
    ) -> Result<RefreshReport, TrackingError>
    where
        F: FnMut(RefreshProgress),
    {
        let _running = self
            .refresh_lock
            .try_lock()
            .map_err(|_| TrackingError::RefreshInProgress)?;
        self.store.check()?;

        let snapshot = self.list().await;
        let total = snapshot.len();
        metrics::counter!("citycast_refresh_runs_total").increment(1);
        tracing::info!(total, batch_size = self.refresher.settings().batch_size, "Starting bulk refresh");

        self.progress.send_replace(RefreshProgress { completed: 0, total });

        let outcome = self
            .refresher
            .run(&snapshot, units, lang, |progress| {
                self.progress.send_replace(progress);
                observer(progress);
            })
            .await;

        let mut refreshed: HashMap<i64, TrackedCity> =
            outcome.cities.into_iter().map(|c| (c.id, c)).collect();

        // Merge by id: cities added or removed during the run stay as they are now
        let (updated, persisted) = {
            let mut cities = self.cities.write().await;
            let mut updated = 0;
            for city in cities.iter_mut() {
                if let Some(fresh) = refreshed.remove(&city.id) {
                    if fresh.last_updated > city.last_updated {
                        *city = fresh;
                        updated += 1;
                    }
                }
            }

            let persisted = match self.store.save_entities(&cities) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "Refreshed cities could not be persisted");
                    false
                }
            };
            (updated, persisted)
        };

        self.progress.send_replace(RefreshProgress::default());
        observer(RefreshProgress::default());

        tracing::info!(
            total,
            updated,
            failed = outcome.failures.len(),
            "Bulk refresh complete"
        );

        Ok(RefreshReport {
            total,
            updated,
            failed: outcome.failures,
            persisted,
        })
    }

    pub fn progress(&self) -> RefreshProgress {
        *self.progress.borrow()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<RefreshProgress> {
        self.progress.subscribe()
    }
}
