pub mod cache;
pub mod config;
pub mod error;
pub mod extractors;
pub mod gateway;
pub mod location;
pub mod preferences;
pub mod routes;
pub mod scheduler;
pub mod store;
pub mod tracking;
pub mod weather;

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::cache::RequestCache;
use crate::config::AppConfig;
use crate::gateway::WeatherGateway;
use crate::location::LocationResolver;
use crate::store::DurableStore;
use crate::tracking::TrackingService;
use crate::weather::WeatherService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub weather_service: Arc<WeatherService>,
    pub tracking_service: Arc<TrackingService>,
    pub cache: RequestCache,
    pub store: DurableStore,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Wire the services around one gateway, one cache and one store
    pub fn new(
        config: Arc<AppConfig>,
        gateway: Arc<dyn WeatherGateway>,
        locator: LocationResolver,
        store: DurableStore,
    ) -> Self {
        let cache = RequestCache::new(config.cache.freshness());

        let weather_service = Arc::new(WeatherService::new(
            Arc::clone(&gateway),
            cache.clone(),
            store.clone(),
            locator,
        ));
        let tracking_service = Arc::new(TrackingService::new(
            gateway,
            cache.clone(),
            store.clone(),
            config.refresh.settings(),
        ));

        Self {
            config,
            weather_service,
            tracking_service,
            cache,
            store,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
