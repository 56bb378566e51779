use std::time::Duration;

use config::{Case, Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::cache::FreshnessTable;
use crate::gateway::{Coordinates, ForecastMode, RetryPolicy, Units};
use crate::tracking::RefreshSettings;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// Local API host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Local API port
    #[serde(default = "default_port")]
    pub port: u16,

    /// OpenWeatherMap API key
    pub openweathermap_api_key: String,

    /// Base URL for current weather and 3-hour forecasts
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// One Call endpoint used for daily forecasts
    #[serde(default = "default_onecall_url")]
    pub onecall_url: String,

    /// Default unit system when no preference is stored
    #[serde(default)]
    pub units: Units,

    /// Default language when no preference is stored
    #[serde(default = "default_language")]
    pub language: String,

    /// Directory holding the durable store
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Forecast source
    #[serde(default)]
    pub forecast_mode: ForecastMode,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub refresh: RefreshConfig,

    #[serde(default)]
    pub geolocation: GeolocationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Freshness window for current-weather entries
    #[serde(default = "default_current_fresh_secs")]
    pub current_fresh_secs: u64,

    /// Freshness window for forecast entries
    #[serde(default = "default_forecast_fresh_secs")]
    pub forecast_fresh_secs: u64,

    /// How often expired entries are evicted
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            current_fresh_secs: default_current_fresh_secs(),
            forecast_fresh_secs: default_forecast_fresh_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl CacheConfig {
    pub fn freshness(&self) -> FreshnessTable {
        FreshnessTable {
            current: Duration::from_secs(self.current_fresh_secs),
            forecast: Duration::from_secs(self.forecast_fresh_secs),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RefreshConfig {
    /// Entities refreshed concurrently per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between batches
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,

    /// Cron expression for periodic bulk refresh (e.g. "0 */30 * * * *")
    #[serde(default)]
    pub schedule: Option<String>,

    /// IANA timezone for the schedule
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            pacing_ms: default_pacing_ms(),
            schedule: None,
            timezone: default_timezone(),
        }
    }
}

impl RefreshConfig {
    pub fn settings(&self) -> RefreshSettings {
        RefreshSettings {
            batch_size: self.batch_size,
            pacing: Duration::from_millis(self.pacing_ms),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GeolocationProvider {
    #[default]
    Fixed,
    Ip,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeolocationConfig {
    /// Disabled geolocation behaves like a denied permission
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub provider: GeolocationProvider,

    /// Coordinate used by the fixed provider
    #[serde(default)]
    pub latitude: Option<f64>,

    #[serde(default)]
    pub longitude: Option<f64>,

    #[serde(default = "default_ip_lookup_url")]
    pub ip_lookup_url: String,

    #[serde(default = "default_geolocation_timeout_secs")]
    pub timeout_secs: u64,

    /// Accepted age of a previous fix
    #[serde(default = "default_maximum_age_secs")]
    pub maximum_age_secs: u64,
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: GeolocationProvider::default(),
            latitude: None,
            longitude: None,
            ip_lookup_url: default_ip_lookup_url(),
            timeout_secs: default_geolocation_timeout_secs(),
            maximum_age_secs: default_maximum_age_secs(),
        }
    }
}

impl GeolocationConfig {
    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(Coordinates::new(lat, lon)),
            _ => None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_api_base_url() -> String {
    crate::gateway::OPENWEATHERMAP_API_URL.to_string()
}

fn default_onecall_url() -> String {
    crate::gateway::ONE_CALL_API_URL.to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_current_fresh_secs() -> u64 {
    10 * 60
}

fn default_forecast_fresh_secs() -> u64 {
    30 * 60
}

fn default_cleanup_interval_secs() -> u64 {
    15 * 60
}

fn default_max_retries() -> u32 {
    1
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    5000
}

fn default_batch_size() -> usize {
    3
}

fn default_pacing_ms() -> u64 {
    500
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_ip_lookup_url() -> String {
    "http://ip-api.com/json".to_string()
}

fn default_geolocation_timeout_secs() -> u64 {
    10
}

fn default_maximum_age_secs() -> u64 {
    5 * 60
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let config = Config::builder()
            .set_default("host", default_host())?
            .set_default("port", default_port())?
            .set_default("language", default_language())?
            .set_default("data_dir", default_data_dir())?
            // Load from config file if present
            .add_source(File::with_name("config").required(false))
            .add_source(File::with_name("config.local").required(false))
            // Override with environment variables (prefixed with CITYCAST_)
            // Convert SCREAMING_SNAKE_CASE env vars to snake_case config keys
            .add_source(
                Environment::with_prefix("CITYCAST")
                    .prefix_separator("_")
                    .separator("__")
                    .convert_case(Case::Snake)
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

/// Defaults plus a dummy API key
#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    Config::builder()
        .set_override("openweathermap_api_key", "test")
        .and_then(|b| b.build())
        .and_then(|c| c.try_deserialize())
        .unwrap()
}
