use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::models::*;
use crate::error::HttpError;

pub const OPENWEATHERMAP_API_URL: &str = "https://api.openweathermap.org/data/2.5";
pub const ONE_CALL_API_URL: &str = "https://api.openweathermap.org/data/3.0/onecall";

/// Gateway failures. Cloneable so that deduplicated callers can share one outcome.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Failed to reach weather service: {0}")]
    Network(String),

    #[error("City not found: {0}")]
    CityNotFound(String),

    #[error("Weather service rejected the API key")]
    Unauthorized,

    #[error("Weather service returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid API response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Network failures, throttling and server errors are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::CityNotFound(_) | Self::Unauthorized | Self::InvalidResponse(_) => false,
        }
    }

    fn outcome_label(&self) -> &'static str {
        match self {
            Self::Network(_) => "network_error",
            Self::CityNotFound(_) => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::Status { .. } => "http_error",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Network(err.to_string())
    }
}

impl HttpError for GatewayError {
    fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode as Http;
        match self {
            Self::CityNotFound(_) => Http::NOT_FOUND,
            Self::Status { status: 429, .. } => Http::TOO_MANY_REQUESTS,
            Self::Network(_) => Http::SERVICE_UNAVAILABLE,
            Self::Unauthorized | Self::Status { .. } | Self::InvalidResponse(_) => Http::BAD_GATEWAY,
        }
    }

    fn error_code(&self) -> Option<&'static str> {
        Some(match self {
            Self::CityNotFound(_) => "CITY_NOT_FOUND",
            Self::Network(_) => "GATEWAY_UNREACHABLE",
            Self::Unauthorized => "GATEWAY_UNAUTHORIZED",
            Self::Status { status: 429, .. } => "GATEWAY_RATE_LIMITED",
            Self::Status { .. } => "GATEWAY_ERROR",
            Self::InvalidResponse(_) => "GATEWAY_INVALID_RESPONSE",
        })
    }
}

/// Remote weather data provider
#[async_trait]
pub trait WeatherGateway: Send + Sync {
    /// Current conditions by city query (`"London"` or `"London,GB"`)
    async fn current_by_city(
        &self,
        city: &str,
        units: Units,
        lang: &str,
    ) -> Result<WeatherSnapshot, GatewayError>;

    /// Current conditions at a coordinate
    async fn current_by_coordinates(
        &self,
        coord: Coordinates,
        units: Units,
        lang: &str,
    ) -> Result<WeatherSnapshot, GatewayError>;

    /// Forecast series at a coordinate
    async fn forecast(
        &self,
        coord: Coordinates,
        units: Units,
        lang: &str,
    ) -> Result<ForecastSeries, GatewayError>;
}

/// Exponential backoff bounded by a ceiling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
        }
    }
}

/// OpenWeatherMap implementation of the Gateway
pub struct OpenWeatherClient {
    client: Client,
    api_key: String,
    base_url: String,
    onecall_url: String,
    forecast_mode: ForecastMode,
    retry: RetryPolicy,
}

impl OpenWeatherClient {
    pub fn new(client: Client, api_key: &str) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            base_url: OPENWEATHERMAP_API_URL.to_string(),
            onecall_url: ONE_CALL_API_URL.to_string(),
            forecast_mode: ForecastMode::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_onecall_url(mut self, onecall_url: &str) -> Self {
        self.onecall_url = onecall_url.to_string();
        self
    }

    pub fn with_forecast_mode(mut self, mode: ForecastMode) -> Self {
        self.forecast_mode = mode;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// GET with retries. `subject` names the location in error messages.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        subject: &str,
    ) -> Result<T, GatewayError> {
        let mut attempt = 0;
        loop {
            match self.send_once(url, query, subject).await {
                Ok(value) => {
                    metrics::counter!("citycast_gateway_requests_total", "outcome" => "ok")
                        .increment(1);
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        subject = %subject,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Gateway request failed, retrying"
                    );
                    metrics::counter!("citycast_gateway_retries_total").increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    metrics::counter!("citycast_gateway_requests_total", "outcome" => e.outcome_label())
                        .increment(1);
                    return Err(e);
                }
            }
        }
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        subject: &str,
    ) -> Result<T, GatewayError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .query(&[("appid", self.api_key.as_str())])
            .send()
            .await?;

        let status = response.status();
        tracing::debug!(subject = %subject, status = %status, "Received API response");

        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::CityNotFound(subject.to_string()));
        }

        if status == StatusCode::UNAUTHORIZED {
            return Err(GatewayError::Unauthorized);
        }

        if !status.is_success() {
            let message = match response.json::<OwmErrorBody>().await {
                Ok(body) => body.message,
                Err(_) => format!("HTTP {}", status),
            };
            return Err(GatewayError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl WeatherGateway for OpenWeatherClient {
    async fn current_by_city(
        &self,
        city: &str,
        units: Units,
        lang: &str,
    ) -> Result<WeatherSnapshot, GatewayError> {
        tracing::debug!(city = %city, units = %units, lang = %lang, "Fetching weather by city");

        let url = format!("{}/weather", self.base_url);
        let query = [
            ("q", city.to_string()),
            ("units", units.as_str().to_string()),
            ("lang", lang.to_string()),
        ];
        let raw: OwmCurrentResponse = self.get_json(&url, &query, city).await?;
        let snapshot = raw.into_snapshot()?;

        tracing::info!(city = %snapshot.name, temp = %snapshot.temperature, "Weather data fetched successfully");
        Ok(snapshot)
    }

    async fn current_by_coordinates(
        &self,
        coord: Coordinates,
        units: Units,
        lang: &str,
    ) -> Result<WeatherSnapshot, GatewayError> {
        let subject = coord.cache_id();
        tracing::debug!(coord = %subject, units = %units, "Fetching weather by coordinates");

        let url = format!("{}/weather", self.base_url);
        let query = [
            ("lat", coord.lat.to_string()),
            ("lon", coord.lon.to_string()),
            ("units", units.as_str().to_string()),
            ("lang", lang.to_string()),
        ];
        let raw: OwmCurrentResponse = self.get_json(&url, &query, &subject).await?;
        let snapshot = raw.into_snapshot()?;

        tracing::info!(city = %snapshot.name, temp = %snapshot.temperature, "Weather data fetched successfully");
        Ok(snapshot)
    }

    async fn forecast(
        &self,
        coord: Coordinates,
        units: Units,
        lang: &str,
    ) -> Result<ForecastSeries, GatewayError> {
        let subject = coord.cache_id();
        tracing::debug!(coord = %subject, mode = ?self.forecast_mode, "Fetching forecast");

        let mut query = vec![
            ("lat", coord.lat.to_string()),
            ("lon", coord.lon.to_string()),
            ("units", units.as_str().to_string()),
            ("lang", lang.to_string()),
        ];

        let series = match self.forecast_mode {
            ForecastMode::ThreeHourly => {
                let url = format!("{}/forecast", self.base_url);
                let raw: OwmForecastResponse = self.get_json(&url, &query, &subject).await?;
                raw.into_series()
            }
            ForecastMode::Daily => {
                query.push(("exclude", "current,minutely,hourly,alerts".to_string()));
                let raw: OwmOneCallResponse =
                    self.get_json(&self.onecall_url, &query, &subject).await?;
                raw.into_series()
            }
        };

        tracing::info!(coord = %subject, periods = series.periods.len(), "Forecast fetched successfully");
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn current_body(name: &str) -> serde_json::Value {
        serde_json::json!({
            "coord": {"lon": 28.9497, "lat": 41.0138},
            "weather": [{"id": 801, "main": "Clouds", "description": "az bulutlu", "icon": "02d"}],
            "main": {"temp": 21.4, "feels_like": 21.0, "temp_min": 20.1, "temp_max": 22.8,
                     "pressure": 1015, "humidity": 60},
            "visibility": 10000,
            "wind": {"speed": 3.6},
            "dt": 1700000000,
            "sys": {"country": "TR", "sunrise": 1699980000, "sunset": 1700017000},
            "timezone": 10800,
            "name": name
        })
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn client_for(server: &MockServer) -> OpenWeatherClient {
        OpenWeatherClient::new(Client::new(), "test_key")
            .with_base_url(&server.uri())
            .with_retry(fast_retry(0))
    }

    #[test]
    fn test_retry_delay_doubles_until_ceiling() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(5000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(5000));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(GatewayError::Network("reset".into()).is_retryable());
        assert!(GatewayError::Status { status: 503, message: String::new() }.is_retryable());
        assert!(GatewayError::Status { status: 429, message: String::new() }.is_retryable());
        assert!(!GatewayError::Status { status: 400, message: String::new() }.is_retryable());
        assert!(!GatewayError::CityNotFound("x".into()).is_retryable());
        assert!(!GatewayError::Unauthorized.is_retryable());
    }

    #[tokio::test]
    async fn test_current_by_city_sends_expected_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .and(query_param("q", "Istanbul"))
            .and(query_param("units", "metric"))
            .and(query_param("lang", "tr"))
            .and(query_param("appid", "test_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(current_body("Istanbul")))
            .expect(1)
            .mount(&server)
            .await;

        let snapshot = client_for(&server)
            .current_by_city("Istanbul", Units::Metric, "tr")
            .await
            .unwrap();

        assert_eq!(snapshot.name, "Istanbul");
        assert_eq!(snapshot.country, "TR");
        assert_eq!(snapshot.condition.description, "az bulutlu");
        assert_eq!(snapshot.timezone_offset, 10800);
    }

    #[tokio::test]
    async fn test_current_by_coordinates_uses_lat_lon() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .and(query_param("lat", "41.0138"))
            .and(query_param("lon", "28.9497"))
            .and(query_param("units", "imperial"))
            .respond_with(ResponseTemplate::new(200).set_body_json(current_body("Fatih")))
            .mount(&server)
            .await;

        let snapshot = client_for(&server)
            .current_by_coordinates(Coordinates::new(41.0138, 28.9497), Units::Imperial, "en")
            .await
            .unwrap();

        assert_eq!(snapshot.name, "Fatih");
    }

    #[tokio::test]
    async fn test_not_found_maps_to_city_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({"cod": "404", "message": "city not found"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .with_retry(fast_retry(3))
            .current_by_city("Atlantis", Units::Metric, "en")
            .await
            .unwrap_err();

        assert_eq!(err, GatewayError::CityNotFound("Atlantis".to_string()));
    }

    #[tokio::test]
    async fn test_server_error_is_retried_then_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .respond_with(
                ResponseTemplate::new(502)
                    .set_body_json(serde_json::json!({"message": "bad gateway"})),
            )
            .expect(3)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .with_retry(fast_retry(2))
            .current_by_city("London", Units::Metric, "en")
            .await
            .unwrap_err();

        assert_eq!(
            err,
            GatewayError::Status {
                status: 502,
                message: "bad gateway".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transient_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .respond_with(ResponseTemplate::new(200).set_body_json(current_body("London")))
            .mount(&server)
            .await;

        let snapshot = client_for(&server)
            .with_retry(fast_retry(1))
            .current_by_city("London", Units::Metric, "en")
            .await
            .unwrap();

        assert_eq!(snapshot.name, "London");
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .with_retry(fast_retry(3))
            .current_by_city("London", Units::Metric, "en")
            .await
            .unwrap_err();

        assert_eq!(err, GatewayError::Unauthorized);
    }

    #[tokio::test]
    async fn test_three_hourly_forecast_is_sorted() {
        let server = MockServer::start().await;
        let entry = |dt: i64, temp: f64| {
            serde_json::json!({
                "dt": dt,
                "main": {"temp": temp, "feels_like": temp, "temp_min": temp, "temp_max": temp,
                         "pressure": 1010, "humidity": 55},
                "weather": [{"id": 500, "main": "Rain", "description": "light rain", "icon": "10d"}],
                "wind": {"speed": 2.0},
                "visibility": 10000,
                "pop": 0.4
            })
        };
        Mock::given(method("GET"))
            .and(path("/forecast"))
            .and(query_param("lat", "51.5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "cod": "200",
                "list": [entry(1700010800, 9.0), entry(1700000000, 8.0)],
                "city": {"name": "London", "coord": {"lat": 51.5, "lon": -0.12},
                         "country": "GB", "timezone": 0}
            })))
            .mount(&server)
            .await;

        let series = client_for(&server)
            .forecast(Coordinates::new(51.5, -0.12), Units::Metric, "en")
            .await
            .unwrap();

        assert_eq!(series.mode, ForecastMode::ThreeHourly);
        assert_eq!(series.location.name.as_deref(), Some("London"));
        assert_eq!(series.periods.len(), 2);
        assert_eq!(series.periods[0].timestamp, 1700000000);
        assert_eq!(series.periods[1].precipitation_probability, 0.4);
    }

    #[tokio::test]
    async fn test_daily_forecast_uses_onecall() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/onecall"))
            .and(query_param("exclude", "current,minutely,hourly,alerts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "lat": 39.93, "lon": 32.86, "timezone": "Europe/Istanbul", "timezone_offset": 10800,
                "daily": [{
                    "dt": 1700038800,
                    "temp": {"day": 14.0, "min": 6.0, "max": 16.0, "night": 8.0, "eve": 12.0, "morn": 7.0},
                    "feels_like": {"day": 13.0, "night": 7.0, "eve": 11.0, "morn": 6.0},
                    "pressure": 1020, "humidity": 45, "wind_speed": 3.3,
                    "weather": [{"id": 800, "main": "Clear", "description": "clear sky", "icon": "01d"}],
                    "pop": 0.0, "uvi": 3.1
                }]
            })))
            .mount(&server)
            .await;

        let series = client_for(&server)
            .with_forecast_mode(ForecastMode::Daily)
            .with_onecall_url(&format!("{}/onecall", server.uri()))
            .forecast(Coordinates::new(39.93, 32.86), Units::Metric, "tr")
            .await
            .unwrap();

        assert_eq!(series.mode, ForecastMode::Daily);
        assert_eq!(series.timezone_offset, 10800);
        assert_eq!(series.periods[0].temp_max, 16.0);
    }
}
