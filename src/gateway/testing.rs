use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::models::fixtures::{series, snapshot};
use super::{Coordinates, ForecastSeries, GatewayError, Units, WeatherGateway, WeatherSnapshot};

/// Gateway double: counts calls, fails configured cities, optional latency
#[derive(Default)]
pub struct FakeGateway {
    pub calls: Mutex<Vec<String>>,
    pub failing: Mutex<HashSet<String>>,
    /// Lowercased query name to the (name, country) the gateway answers with
    pub aliases: Mutex<HashMap<String, (String, String)>>,
    pub latency: std::time::Duration,
    pub temperature: Mutex<f64>,
}

impl FakeGateway {
    pub fn failing_on(names: &[&str]) -> Self {
        let gateway = Self::default();
        gateway
            .failing
            .lock()
            .unwrap()
            .extend(names.iter().map(|n| n.to_lowercase()));
        gateway
    }

    pub fn with_alias(self, query: &str, name: &str, country: &str) -> Self {
        self.aliases
            .lock()
            .unwrap()
            .insert(query.to_lowercase(), (name.to_string(), country.to_string()));
        self
    }

    pub fn with_latency(mut self, latency: std::time::Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn set_temperature(&self, temperature: f64) {
        *self.temperature.lock().unwrap() = temperature;
    }
}

#[async_trait]
impl WeatherGateway for FakeGateway {
    async fn current_by_city(
        &self,
        city: &str,
        _units: Units,
        _lang: &str,
    ) -> Result<WeatherSnapshot, GatewayError> {
        self.calls.lock().unwrap().push(city.to_string());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let (name, country) = crate::tracking::parse_city_query(city);
        if self.failing.lock().unwrap().contains(&name.to_lowercase()) {
            return Err(GatewayError::CityNotFound(city.to_string()));
        }

        let temperature = *self.temperature.lock().unwrap();
        if let Some((name, country)) = self.aliases.lock().unwrap().get(&name.to_lowercase()) {
            return Ok(snapshot(name, country, temperature));
        }
        Ok(snapshot(name, country.unwrap_or("XX"), temperature))
    }

    async fn current_by_coordinates(
        &self,
        coord: Coordinates,
        _units: Units,
        _lang: &str,
    ) -> Result<WeatherSnapshot, GatewayError> {
        self.calls.lock().unwrap().push(coord.cache_id());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let mut snap = snapshot("Here", "XX", *self.temperature.lock().unwrap());
        snap.coord = coord;
        Ok(snap)
    }

    async fn forecast(
        &self,
        coord: Coordinates,
        _units: Units,
        _lang: &str,
    ) -> Result<ForecastSeries, GatewayError> {
        self.calls.lock().unwrap().push(format!("forecast:{}", coord.cache_id()));
        Ok(series(Vec::new()))
    }
}
