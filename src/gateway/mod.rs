mod client;
pub mod models;
#[cfg(test)]
pub(crate) mod testing;

pub use client::{
    GatewayError, OpenWeatherClient, RetryPolicy, WeatherGateway, ONE_CALL_API_URL,
    OPENWEATHERMAP_API_URL,
};
pub use models::{
    Condition, Coordinates, ForecastLocation, ForecastMode, ForecastPeriod, ForecastSeries, Units,
    WeatherSnapshot,
};
