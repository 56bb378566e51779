pub mod handlers;
mod service;

pub use service::{DailyForecast, FetchStatus, WeatherError, WeatherService};
