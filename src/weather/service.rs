use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::cache::{CacheKey, CachedValue, RequestCache};
use crate::error::HttpError;
use crate::gateway::{
    Coordinates, ForecastLocation, ForecastMode, ForecastPeriod, ForecastSeries, GatewayError,
    Units, WeatherGateway, WeatherSnapshot,
};
use crate::location::{LocationError, LocationResolver};
use crate::store::DurableStore;

#[derive(Error, Debug)]
pub enum WeatherError {
    #[error("City name must not be empty")]
    EmptyCity,

    #[error("Invalid coordinates: lat={lat}, lon={lon}")]
    InvalidCoordinates { lat: f64, lon: f64 },

    #[error("Failed to fetch weather for {query}: {source}")]
    Gateway {
        query: String,
        #[source]
        source: GatewayError,
    },

    #[error(transparent)]
    Location(#[from] LocationError),
}

impl HttpError for WeatherError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::EmptyCity | Self::InvalidCoordinates { .. } => StatusCode::BAD_REQUEST,
            Self::Gateway { source, .. } => source.status_code(),
            Self::Location(e) => e.status_code(),
        }
    }

    fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::EmptyCity => Some("EMPTY_CITY_NAME"),
            Self::InvalidCoordinates { .. } => Some("INVALID_COORDINATES"),
            Self::Gateway { source, .. } => source.error_code(),
            Self::Location(e) => e.error_code(),
        }
    }

    fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Location(e) => e.hint(),
            _ => None,
        }
    }
}

crate::impl_into_response!(WeatherError);

/// Loading/error state readable by presentation
#[derive(Debug, Clone, Serialize)]
pub struct FetchStatus {
    pub loading: bool,
    /// Fetches currently in flight
    pub in_flight: usize,
    pub error: Option<String>,
    /// Most recently fetched current conditions
    pub active: Option<WeatherSnapshot>,
}

/// Daily view of a forecast series
#[derive(Debug, Clone, Serialize)]
pub struct DailyForecast {
    pub location: ForecastLocation,
    pub mode: ForecastMode,
    pub days: Vec<ForecastPeriod>,
}

#[derive(Debug, Default)]
struct FetchState {
    active: Option<WeatherSnapshot>,
    error: Option<String>,
}

/// Decrements the in-flight counter when a fetch settles or is dropped
struct Loading<'a>(&'a AtomicUsize);

impl Drop for Loading<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Single-location fetches through the request cache.
///
/// Owns the "active" snapshot: the result of the most recently completed
/// successful fetch, which is also written to the store as the last-known
/// snapshot.
pub struct WeatherService {
    gateway: Arc<dyn WeatherGateway>,
    cache: RequestCache,
    store: DurableStore,
    locator: LocationResolver,
    state: RwLock<FetchState>,
    in_flight: AtomicUsize,
}

impl WeatherService {
    /// Create the service, restoring the last-known snapshot from the store
    pub fn new(
        gateway: Arc<dyn WeatherGateway>,
        cache: RequestCache,
        store: DurableStore,
        locator: LocationResolver,
    ) -> Self {
        let active = store.load_last_snapshot();
        if let Some(snapshot) = &active {
            tracing::info!(city = %snapshot.name, "Restored last known weather");
        }

        Self {
            gateway,
            cache,
            store,
            locator,
            state: RwLock::new(FetchState {
                active,
                error: None,
            }),
            in_flight: AtomicUsize::new(0),
        }
    }

    fn begin(&self) -> Loading<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Loading(&self.in_flight)
    }

    pub async fn fetch_by_city(
        &self,
        city: &str,
        units: Units,
        lang: &str,
    ) -> Result<WeatherSnapshot, WeatherError> {
        let city = city.trim();
        if city.is_empty() {
            return Err(WeatherError::EmptyCity);
        }

        let _loading = self.begin();
        let key = CacheKey::current_city(city, units, lang);
        let gateway = Arc::clone(&self.gateway);
        let (query, lang_owned) = (city.to_string(), lang.to_string());

        let result = self
            .cache
            .get_or_fetch(&key, move || async move {
                gateway
                    .current_by_city(&query, units, &lang_owned)
                    .await
                    .map(CachedValue::Current)
            })
            .await
            .and_then(current_value);

        self.settle(city, result, units, lang).await
    }

    pub async fn fetch_by_coordinates(
        &self,
        lat: f64,
        lon: f64,
        units: Units,
        lang: &str,
    ) -> Result<WeatherSnapshot, WeatherError> {
        let coord = validated(lat, lon)?;

        let _loading = self.begin();
        let key = CacheKey::current_coordinates(coord, units, lang);
        let gateway = Arc::clone(&self.gateway);
        let lang_owned = lang.to_string();

        let result = self
            .cache
            .get_or_fetch(&key, move || async move {
                gateway
                    .current_by_coordinates(coord, units, &lang_owned)
                    .await
                    .map(CachedValue::Current)
            })
            .await
            .and_then(current_value);

        self.settle(&coord.cache_id(), result, units, lang).await
    }

    /// Record the outcome of a current-weather fetch.
    ///
    /// A failure leaves the active snapshot as it was.
    async fn settle(
        &self,
        query: &str,
        result: Result<WeatherSnapshot, GatewayError>,
        units: Units,
        lang: &str,
    ) -> Result<WeatherSnapshot, WeatherError> {
        match result {
            Ok(snapshot) => {
                {
                    // Persist under the lock so the stored and active snapshots agree
                    let mut state = self.state.write().await;
                    if let Err(e) = self.store.save_last_snapshot(&snapshot) {
                        tracing::warn!(city = %snapshot.name, error = %e, "Failed to persist last known weather");
                    }
                    state.active = Some(snapshot.clone());
                    state.error = None;
                }

                self.prewarm_forecast(snapshot.coord, units, lang);
                Ok(snapshot)
            }
            Err(source) => {
                let err = WeatherError::Gateway {
                    query: query.to_string(),
                    source,
                };
                self.state.write().await.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Fill the forecast entry for a location in the background
    fn prewarm_forecast(&self, coord: Coordinates, units: Units, lang: &str) {
        let gateway = Arc::clone(&self.gateway);
        let cache = self.cache.clone();
        let lang = lang.to_string();

        tokio::spawn(async move {
            if let Err(e) = cached_forecast(gateway, &cache, coord, units, &lang).await {
                tracing::debug!(coord = %coord.cache_id(), error = %e, "Forecast pre-warm failed");
            }
        });
    }

    /// Forecast series for a coordinate, ascending by timestamp
    pub async fn forecast(
        &self,
        lat: f64,
        lon: f64,
        units: Units,
        lang: &str,
    ) -> Result<ForecastSeries, WeatherError> {
        let coord = validated(lat, lon)?;
        let _loading = self.begin();

        match cached_forecast(Arc::clone(&self.gateway), &self.cache, coord, units, lang).await {
            Ok(series) => Ok(series),
            Err(source) => {
                let err = WeatherError::Gateway {
                    query: coord.cache_id(),
                    source,
                };
                self.state.write().await.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// One representative period per day, nearest to local midday
    pub async fn daily_forecast(
        &self,
        lat: f64,
        lon: f64,
        units: Units,
        lang: &str,
        days: usize,
    ) -> Result<DailyForecast, WeatherError> {
        let series = self.forecast(lat, lon, units, lang).await?;
        let days = series
            .daily_representatives(days)
            .into_iter()
            .cloned()
            .collect();

        Ok(DailyForecast {
            location: series.location,
            mode: series.mode,
            days,
        })
    }

    /// Ask the host for its position; failures are classified by cause
    pub async fn resolve_current_location(&self) -> Result<Coordinates, WeatherError> {
        match self.locator.current_position().await {
            Ok(coord) => Ok(coord),
            Err(e) => {
                tracing::warn!(error = %e, "Could not resolve current location");
                self.state.write().await.error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Current weather at the host's position
    pub async fn fetch_current_location(
        &self,
        units: Units,
        lang: &str,
    ) -> Result<WeatherSnapshot, WeatherError> {
        let coord = self.resolve_current_location().await?;
        self.fetch_by_coordinates(coord.lat, coord.lon, units, lang)
            .await
    }

    pub async fn active(&self) -> Option<WeatherSnapshot> {
        self.state.read().await.active.clone()
    }

    pub async fn status(&self) -> FetchStatus {
        let state = self.state.read().await;
        let in_flight = self.in_flight.load(Ordering::SeqCst);
        FetchStatus {
            loading: in_flight > 0,
            in_flight,
            error: state.error.clone(),
            active: state.active.clone(),
        }
    }
}

fn validated(lat: f64, lon: f64) -> Result<Coordinates, WeatherError> {
    let coord = Coordinates::new(lat, lon);
    if coord.is_valid() {
        Ok(coord)
    } else {
        Err(WeatherError::InvalidCoordinates { lat, lon })
    }
}

fn current_value(value: CachedValue) -> Result<WeatherSnapshot, GatewayError> {
    value
        .into_current()
        .ok_or_else(|| GatewayError::InvalidResponse("cached entry is not current weather".to_string()))
}

async fn cached_forecast(
    gateway: Arc<dyn WeatherGateway>,
    cache: &RequestCache,
    coord: Coordinates,
    units: Units,
    lang: &str,
) -> Result<ForecastSeries, GatewayError> {
    let key = CacheKey::forecast(coord, units, lang);
    let lang = lang.to_string();

    let value = cache
        .get_or_fetch(&key, move || async move {
            gateway
                .forecast(coord, units, &lang)
                .await
                .map(CachedValue::Forecast)
        })
        .await?;

    value
        .into_forecast()
        .ok_or_else(|| GatewayError::InvalidResponse("cached entry is not a forecast".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::cache::FreshnessTable;
    use crate::gateway::models::fixtures::snapshot;
    use crate::gateway::testing::FakeGateway;
    use crate::location::{DeniedGeolocator, FixedGeolocator, Geolocator};

    fn service_with(
        gateway: Arc<FakeGateway>,
        store: DurableStore,
        locator: Arc<dyn Geolocator>,
    ) -> (WeatherService, RequestCache) {
        let cache = RequestCache::new(FreshnessTable::default());
        let resolver = LocationResolver::new(locator, Duration::from_secs(10), Duration::from_secs(300));
        (
            WeatherService::new(gateway, cache.clone(), store, resolver),
            cache,
        )
    }

    fn service(gateway: Arc<FakeGateway>) -> (WeatherService, RequestCache) {
        service_with(
            gateway,
            DurableStore::memory(),
            Arc::new(FixedGeolocator::new(Some(Coordinates::new(52.52, 13.405)))),
        )
    }

    #[tokio::test]
    async fn test_fetch_by_city_caches_and_persists() {
        let gateway = Arc::new(FakeGateway::default());
        let store = DurableStore::memory();
        let (service, cache) = service_with(gateway.clone(), store.clone(), Arc::new(DeniedGeolocator));

        let first = service.fetch_by_city("Lisbon", Units::Metric, "en").await.unwrap();
        let second = service.fetch_by_city("lisbon", Units::Metric, "en").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(gateway.calls.lock().unwrap().iter().filter(|c| !c.starts_with("forecast:")).count(), 1);
        assert!(cache
            .get(&CacheKey::current_city("Lisbon", Units::Metric, "en"))
            .is_some());
        assert_eq!(store.load_last_snapshot(), Some(first.clone()));
        assert_eq!(service.active().await, Some(first));
    }

    #[tokio::test]
    async fn test_units_and_language_are_separate_entries() {
        let gateway = Arc::new(FakeGateway::default());
        let (service, _) = service(gateway.clone());

        service.fetch_by_city("Lisbon", Units::Metric, "en").await.unwrap();
        service.fetch_by_city("Lisbon", Units::Imperial, "en").await.unwrap();
        service.fetch_by_city("Lisbon", Units::Metric, "pt").await.unwrap();

        let current_calls = gateway
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| !c.starts_with("forecast:"))
            .count();
        assert_eq!(current_calls, 3);
    }

    #[tokio::test]
    async fn test_failure_keeps_active_snapshot() {
        let gateway = Arc::new(FakeGateway::failing_on(&["Atlantis"]));
        let (service, _) = service(gateway);

        let good = service.fetch_by_city("Lisbon", Units::Metric, "en").await.unwrap();
        let err = service.fetch_by_city("Atlantis", Units::Metric, "en").await.unwrap_err();

        assert!(err.to_string().contains("Atlantis"));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let status = service.status().await;
        assert!(!status.loading);
        assert_eq!(status.active, Some(good));
        assert!(status.error.unwrap().contains("Atlantis"));

        // The next success clears the error
        service.fetch_by_city("Porto", Units::Metric, "en").await.unwrap();
        assert!(service.status().await.error.is_none());
    }

    #[tokio::test]
    async fn test_empty_city_and_bad_coordinates_rejected_before_network() {
        let gateway = Arc::new(FakeGateway::default());
        let (service, _) = service(gateway.clone());

        assert!(matches!(
            service.fetch_by_city("  ", Units::Metric, "en").await,
            Err(WeatherError::EmptyCity)
        ));
        assert!(matches!(
            service.fetch_by_coordinates(95.0, 0.0, Units::Metric, "en").await,
            Err(WeatherError::InvalidCoordinates { .. })
        ));
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_fetches_share_one_call() {
        let gateway = Arc::new(FakeGateway::default().with_latency(Duration::from_millis(50)));
        let (service, _) = service(gateway.clone());

        let (a, b, c) = tokio::join!(
            service.fetch_by_city("Lisbon", Units::Metric, "en"),
            service.fetch_by_city("Lisbon", Units::Metric, "en"),
            service.fetch_by_city("LISBON", Units::Metric, "en"),
        );

        assert_eq!(a.unwrap(), b.unwrap());
        assert!(c.is_ok());
        let current_calls = gateway
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| !c.starts_with("forecast:"))
            .count();
        assert_eq!(current_calls, 1);
    }

    #[tokio::test]
    async fn test_forecast_prewarmed_after_fetch() {
        let gateway = Arc::new(FakeGateway::default());
        let (service, cache) = service(gateway.clone());

        let snapshot = service.fetch_by_city("Lisbon", Units::Metric, "en").await.unwrap();

        let key = CacheKey::forecast(snapshot.coord, Units::Metric, "en");
        for _ in 0..10 {
            if cache.get(&key).is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(cache.get(&key).is_some());

        // Served from the pre-warmed entry
        let calls = gateway.call_count();
        service
            .forecast(snapshot.coord.lat, snapshot.coord.lon, Units::Metric, "en")
            .await
            .unwrap();
        assert_eq!(gateway.call_count(), calls);
    }

    #[tokio::test]
    async fn test_current_location_paths() {
        let gateway = Arc::new(FakeGateway::default());
        let (service, _) = service(gateway.clone());
        let here = service.fetch_current_location(Units::Metric, "en").await.unwrap();
        assert_eq!(here.coord, Coordinates::new(52.52, 13.405));

        let (denied, _) = service_with(gateway, DurableStore::memory(), Arc::new(DeniedGeolocator));
        let err = denied.fetch_current_location(Units::Metric, "en").await.unwrap_err();
        assert!(matches!(err, WeatherError::Location(LocationError::PermissionDenied)));
        assert_eq!(err.error_code(), Some("LOCATION_PERMISSION_DENIED"));
        assert!(err.hint().unwrap().contains("city name"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_fetches_leave_store_and_active_in_agreement() {
        let store = DurableStore::memory();
        let (service, _) = service_with(
            Arc::new(FakeGateway::default()),
            store.clone(),
            Arc::new(DeniedGeolocator),
        );
        let service = Arc::new(service);

        let cities = [
            "Ankara", "Bursa", "Konya", "Adana", "Mersin", "Samsun", "Trabzon", "Van",
        ];
        for _ in 0..5 {
            let tasks: Vec<_> = cities
                .iter()
                .copied()
                .map(|city| {
                    let service = Arc::clone(&service);
                    tokio::spawn(async move {
                        service.fetch_by_city(city, Units::Metric, "tr").await
                    })
                })
                .collect();
            for task in tasks {
                task.await.unwrap().unwrap();
            }

            assert_eq!(store.load_last_snapshot(), service.active().await);
            service.cache.clear();
        }
    }

    #[tokio::test]
    async fn test_hydrates_last_snapshot() {
        let store = DurableStore::memory();
        let saved = snapshot("Valletta", "MT", 24.0);
        store.save_last_snapshot(&saved).unwrap();

        let (service, _) = service_with(Arc::new(FakeGateway::default()), store, Arc::new(DeniedGeolocator));
        assert_eq!(service.active().await, Some(saved));
    }
}
