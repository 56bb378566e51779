use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use super::models::{RefreshFailure, RefreshProgress, TrackedCity};
use crate::cache::{CacheKey, CachedValue, RequestCache};
use crate::gateway::{GatewayError, Units, WeatherGateway};

/// Concurrency and pacing for bulk refreshes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshSettings {
    pub batch_size: usize,
    pub pacing: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            batch_size: 3,
            pacing: Duration::from_millis(500),
        }
    }
}

/// Cities after a run, in input order, plus the ones that kept their old weather
#[derive(Debug)]
pub struct RefreshOutcome {
    pub cities: Vec<TrackedCity>,
    pub failures: Vec<RefreshFailure>,
}

/// Refreshes tracked cities against the gateway in paced, fixed-size batches
pub struct BatchRefresher {
    gateway: Arc<dyn WeatherGateway>,
    cache: RequestCache,
    settings: RefreshSettings,
}

impl BatchRefresher {
    pub fn new(gateway: Arc<dyn WeatherGateway>, cache: RequestCache, settings: RefreshSettings) -> Self {
        Self {
            gateway,
            cache,
            settings,
        }
    }

    pub fn settings(&self) -> RefreshSettings {
        self.settings
    }

    /// Fetch fresh weather for one city, bypassing cached values.
    ///
    /// The result is written back to the cache under the city's query key.
    pub async fn refresh_one(
        &self,
        city: &TrackedCity,
        units: Units,
        lang: &str,
    ) -> Result<TrackedCity, GatewayError> {
        let query = city.query();
        let snapshot = self.gateway.current_by_city(&query, units, lang).await?;

        self.cache.put(
            &CacheKey::current_city(&query, units, lang),
            CachedValue::Current(snapshot.clone()),
        );

        Ok(city.with_weather(snapshot, chrono::Utc::now().timestamp_millis()))
    }

    /// Refresh every city. Never fails as a whole: a city whose fetch fails is
    /// returned unchanged and listed in the failures.
    ///
    /// `on_progress` is called once per batch, after all of the batch's fetches
    /// settle and before the pacing delay.
    pub async fn run<F>(
        &self,
        cities: &[TrackedCity],
        units: Units,
        lang: &str,
        mut on_progress: F,
    ) -> RefreshOutcome
    where
        F: FnMut(RefreshProgress),
    {
        let total = cities.len();
        let batch_size = self.settings.batch_size.max(1);
        let batch_count = total.div_ceil(batch_size);

        let mut refreshed = Vec::with_capacity(total);
        let mut failures = Vec::new();

        for (index, batch) in cities.chunks(batch_size).enumerate() {
            tracing::debug!(batch = index + 1, of = batch_count, size = batch.len(), "Refreshing batch");

            let results = join_all(batch.iter().map(|city| self.refresh_one(city, units, lang))).await;

            for (city, result) in batch.iter().zip(results) {
                match result {
                    Ok(updated) => refreshed.push(updated),
                    Err(e) => {
                        tracing::warn!(city = %city.name, id = city.id, error = %e, "City refresh failed, keeping previous weather");
                        metrics::counter!("citycast_refresh_failures_total").increment(1);
                        failures.push(RefreshFailure {
                            id: city.id,
                            name: city.name.clone(),
                            error: e.to_string(),
                        });
                        refreshed.push(city.clone());
                    }
                }
            }

            on_progress(RefreshProgress {
                completed: refreshed.len(),
                total,
            });

            if index + 1 < batch_count {
                tokio::time::sleep(self.settings.pacing).await;
            }
        }

        RefreshOutcome {
            cities: refreshed,
            failures,
        }
    }
}
