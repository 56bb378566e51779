use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use super::models::{AddCityRequest, RefreshProgress, RefreshReport, TrackedCity};
use super::service::TrackingError;
use crate::extractors::Locale;
use crate::AppState;

/// List tracked cities in insertion order
pub async fn list_cities(State(state): State<AppState>) -> Json<Vec<TrackedCity>> {
    Json(state.tracking_service.list().await)
}

/// Track a new city
pub async fn add_city(
    State(state): State<AppState>,
    locale: Locale,
    Json(request): Json<AddCityRequest>,
) -> Result<(StatusCode, Json<TrackedCity>), TrackingError> {
    let city = state
        .tracking_service
        .add(&request.name, locale.units, &locale.language)
        .await?;
    Ok((StatusCode::CREATED, Json(city)))
}

/// Stop tracking a city
pub async fn remove_city(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<TrackedCity>, TrackingError> {
    Ok(Json(state.tracking_service.remove(id).await?))
}

/// Refresh one tracked city
pub async fn refresh_city(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    locale: Locale,
) -> Result<Json<TrackedCity>, TrackingError> {
    let city = state
        .tracking_service
        .refresh_city(id, locale.units, &locale.language)
        .await?;
    Ok(Json(city))
}

/// Refresh every tracked city; responds when the run completes
pub async fn refresh_all(
    State(state): State<AppState>,
    locale: Locale,
) -> Result<Json<RefreshReport>, TrackingError> {
    let report = state
        .tracking_service
        .refresh_all(locale.units, &locale.language)
        .await?;
    Ok(Json(report))
}

/// Progress of the running bulk refresh, (0, 0) when idle
pub async fn refresh_progress(State(state): State<AppState>) -> Json<RefreshProgress> {
    Json(state.tracking_service.progress())
}
