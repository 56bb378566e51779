pub mod handlers;
mod models;
mod refresh;
mod service;

pub use models::{
    parse_city_query, AddCityRequest, RefreshFailure, RefreshProgress, RefreshReport, TrackedCity,
};
pub use refresh::{BatchRefresher, RefreshOutcome, RefreshSettings};
pub use service::{TrackingError, TrackingService};
