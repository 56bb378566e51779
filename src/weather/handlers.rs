use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use super::service::{DailyForecast, FetchStatus, WeatherError};
use crate::extractors::{CityParam, Locale};
use crate::gateway::{Coordinates, ForecastSeries, WeatherSnapshot};
use crate::AppState;

const DEFAULT_FORECAST_DAYS: usize = 7;

#[derive(Debug, Deserialize)]
pub struct CoordsQuery {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Deserialize)]
pub struct DailyQuery {
    pub lat: f64,
    pub lon: f64,
    /// Number of days, 7 when omitted
    pub days: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Current weather by city name (path or `?city=`)
pub async fn get_weather(
    State(state): State<AppState>,
    city: CityParam,
    locale: Locale,
) -> Result<Json<WeatherSnapshot>, WeatherError> {
    let city = city.into_inner().ok_or(WeatherError::EmptyCity)?;
    let weather = state
        .weather_service
        .fetch_by_city(&city, locale.units, &locale.language)
        .await?;
    Ok(Json(weather))
}

/// Current weather at a coordinate
pub async fn get_weather_by_coords(
    State(state): State<AppState>,
    Query(coords): Query<CoordsQuery>,
    locale: Locale,
) -> Result<Json<WeatherSnapshot>, WeatherError> {
    let weather = state
        .weather_service
        .fetch_by_coordinates(coords.lat, coords.lon, locale.units, &locale.language)
        .await?;
    Ok(Json(weather))
}

/// Current weather at the host's position
pub async fn get_weather_here(
    State(state): State<AppState>,
    locale: Locale,
) -> Result<Json<WeatherSnapshot>, WeatherError> {
    let weather = state
        .weather_service
        .fetch_current_location(locale.units, &locale.language)
        .await?;
    Ok(Json(weather))
}

/// Loading flag, last error and active snapshot
pub async fn get_status(State(state): State<AppState>) -> Json<FetchStatus> {
    Json(state.weather_service.status().await)
}

pub async fn get_location(State(state): State<AppState>) -> Result<Json<Coordinates>, WeatherError> {
    Ok(Json(state.weather_service.resolve_current_location().await?))
}

pub async fn get_forecast(
    State(state): State<AppState>,
    Query(coords): Query<CoordsQuery>,
    locale: Locale,
) -> Result<Json<ForecastSeries>, WeatherError> {
    let series = state
        .weather_service
        .forecast(coords.lat, coords.lon, locale.units, &locale.language)
        .await?;
    Ok(Json(series))
}

/// One period per day, nearest to local midday
pub async fn get_daily_forecast(
    State(state): State<AppState>,
    Query(query): Query<DailyQuery>,
    locale: Locale,
) -> Result<Json<DailyForecast>, WeatherError> {
    let forecast = state
        .weather_service
        .daily_forecast(
            query.lat,
            query.lon,
            locale.units,
            &locale.language,
            query.days.unwrap_or(DEFAULT_FORECAST_DAYS),
        )
        .await?;
    Ok(Json(forecast))
}

#[derive(Debug, Serialize)]
pub struct CacheCleared {
    pub removed: usize,
}

/// Drop every request cache entry
pub async fn clear_cache(State(state): State<AppState>) -> Json<CacheCleared> {
    let removed = state.cache.len();
    state.cache.clear();
    Json(CacheCleared { removed })
}

/// Prometheus text exposition
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
