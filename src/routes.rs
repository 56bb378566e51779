use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::preferences;
use crate::tracking::handlers as tracking_handlers;
use crate::weather::handlers as weather_handlers;
use crate::AppState;

/// Current weather and location routes
fn weather_routes() -> Router<AppState> {
    Router::new()
        .route("/weather", get(weather_handlers::get_weather))
        .route("/weather/coords", get(weather_handlers::get_weather_by_coords))
        .route("/weather/here", get(weather_handlers::get_weather_here))
        .route("/weather/status", get(weather_handlers::get_status))
        .route("/weather/{city}", get(weather_handlers::get_weather))
        .route("/location", get(weather_handlers::get_location))
}

fn forecast_routes() -> Router<AppState> {
    Router::new()
        .route("/forecast", get(weather_handlers::get_forecast))
        .route("/forecast/daily", get(weather_handlers::get_daily_forecast))
}

/// Tracked cities and bulk refresh
fn cities_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/cities",
            get(tracking_handlers::list_cities).post(tracking_handlers::add_city),
        )
        .route("/cities/refresh", post(tracking_handlers::refresh_all))
        .route(
            "/cities/refresh/progress",
            get(tracking_handlers::refresh_progress),
        )
        .route("/cities/{id}", delete(tracking_handlers::remove_city))
        .route("/cities/{id}/refresh", post(tracking_handlers::refresh_city))
}

fn settings_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/preferences",
            get(preferences::get_preferences).put(preferences::update_preferences),
        )
        .route("/cache", delete(weather_handlers::clear_cache))
}

/// Build all API v1 routes
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .merge(weather_routes())
        .merge(forecast_routes())
        .merge(cities_routes())
        .merge(settings_routes())
}

/// Build the complete application router
pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/", get(weather_handlers::health))
        .route("/health", get(weather_handlers::health))
        .route("/metrics", get(weather_handlers::metrics))
        .nest("/api/v1", api_v1_routes())
}
