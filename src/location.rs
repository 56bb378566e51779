//! Current-position acquisition.
//!
//! A [`Geolocator`] answers "where am I"; the [`LocationResolver`] wraps it
//! with a bounded wait and reuses a recent fix instead of asking every time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::{GeolocationConfig, GeolocationProvider};
use crate::error::HttpError;
use crate::gateway::Coordinates;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LocationError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location unavailable: {0}")]
    PositionUnavailable(String),

    #[error("Location request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Location services are not supported on this host")]
    Unsupported,
}

impl LocationError {
    /// What the user can do about it
    pub fn guidance(&self) -> &'static str {
        match self {
            Self::PermissionDenied => {
                "Location access is disabled. Search by city name instead, or enable geolocation."
            }
            Self::PositionUnavailable(_) => {
                "Your position could not be determined. Search by city name instead."
            }
            Self::Timeout(_) => "Finding your position took too long. Try again or search by city name.",
            Self::Unsupported => {
                "No location source is configured. Search by city name instead."
            }
        }
    }
}

impl HttpError for LocationError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::PositionUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Unsupported => StatusCode::NOT_IMPLEMENTED,
        }
    }

    fn error_code(&self) -> Option<&'static str> {
        Some(match self {
            Self::PermissionDenied => "LOCATION_PERMISSION_DENIED",
            Self::PositionUnavailable(_) => "LOCATION_UNAVAILABLE",
            Self::Timeout(_) => "LOCATION_TIMEOUT",
            Self::Unsupported => "LOCATION_UNSUPPORTED",
        })
    }

    fn hint(&self) -> Option<&'static str> {
        Some(self.guidance())
    }
}

/// Source of the host's current coordinate
#[async_trait]
pub trait Geolocator: Send + Sync {
    async fn locate(&self) -> Result<Coordinates, LocationError>;
}

/// Location disabled by the user
pub struct DeniedGeolocator;

#[async_trait]
impl Geolocator for DeniedGeolocator {
    async fn locate(&self) -> Result<Coordinates, LocationError> {
        Err(LocationError::PermissionDenied)
    }
}

/// Coordinate configured for this host
pub struct FixedGeolocator {
    coord: Option<Coordinates>,
}

impl FixedGeolocator {
    pub fn new(coord: Option<Coordinates>) -> Self {
        Self { coord }
    }
}

#[async_trait]
impl Geolocator for FixedGeolocator {
    async fn locate(&self) -> Result<Coordinates, LocationError> {
        self.coord.ok_or(LocationError::Unsupported)
    }
}

#[derive(Debug, Deserialize)]
struct IpLookupResponse {
    status: Option<String>,
    message: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
}

/// Approximate position from an IP lookup service (ip-api.com format)
pub struct IpGeolocator {
    client: Client,
    url: String,
}

impl IpGeolocator {
    pub fn new(client: Client, url: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl Geolocator for IpGeolocator {
    async fn locate(&self) -> Result<Coordinates, LocationError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| LocationError::PositionUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LocationError::PositionUnavailable(format!(
                "lookup returned HTTP {}",
                response.status()
            )));
        }

        let body: IpLookupResponse = response
            .json()
            .await
            .map_err(|e| LocationError::PositionUnavailable(e.to_string()))?;

        if body.status.as_deref().is_some_and(|s| s != "success") {
            return Err(LocationError::PositionUnavailable(
                body.message.unwrap_or_else(|| "lookup failed".to_string()),
            ));
        }

        match (body.lat, body.lon) {
            (Some(lat), Some(lon)) => Ok(Coordinates::new(lat, lon)),
            _ => Err(LocationError::PositionUnavailable(
                "lookup returned no coordinates".to_string(),
            )),
        }
    }
}

/// Bounded, cache-aware access to a [`Geolocator`]
pub struct LocationResolver {
    provider: Arc<dyn Geolocator>,
    timeout: Duration,
    maximum_age: Duration,
    last_fix: Mutex<Option<(Coordinates, Instant)>>,
}

impl LocationResolver {
    pub fn new(provider: Arc<dyn Geolocator>, timeout: Duration, maximum_age: Duration) -> Self {
        Self {
            provider,
            timeout,
            maximum_age,
            last_fix: Mutex::new(None),
        }
    }

    /// Build the resolver described by configuration
    pub fn from_config(config: &GeolocationConfig, client: Client) -> Self {
        let provider: Arc<dyn Geolocator> = if !config.enabled {
            Arc::new(DeniedGeolocator)
        } else {
            match config.provider {
                GeolocationProvider::Fixed => Arc::new(FixedGeolocator::new(config.coordinates())),
                GeolocationProvider::Ip => {
                    Arc::new(IpGeolocator::new(client, &config.ip_lookup_url))
                }
            }
        };

        Self::new(
            provider,
            Duration::from_secs(config.timeout_secs),
            Duration::from_secs(config.maximum_age_secs),
        )
    }

    /// Current position, reusing a fix younger than the maximum age
    pub async fn current_position(&self) -> Result<Coordinates, LocationError> {
        let mut last_fix = self.last_fix.lock().await;

        if let Some((coord, at)) = *last_fix {
            if at.elapsed() <= self.maximum_age {
                tracing::debug!(lat = coord.lat, lon = coord.lon, "Using recent position fix");
                return Ok(coord);
            }
        }

        let coord = match tokio::time::timeout(self.timeout, self.provider.locate()).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(timeout_secs = self.timeout.as_secs(), "Position request timed out");
                return Err(LocationError::Timeout(self.timeout));
            }
        };

        tracing::info!(lat = coord.lat, lon = coord.lon, "Acquired position fix");
        *last_fix = Some((coord, Instant::now()));
        Ok(coord)
    }
}
