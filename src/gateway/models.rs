use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::client::GatewayError;

// ============================================================================
// Shared value types
// ============================================================================

/// Unit system requested from the Gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Metric,
    Imperial,
}

impl Units {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metric => "metric",
            Self::Imperial => "imperial",
        }
    }

    pub fn temperature_symbol(&self) -> &'static str {
        match self {
            Self::Metric => "°C",
            Self::Imperial => "°F",
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Units {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "metric" => Ok(Self::Metric),
            "imperial" => Ok(Self::Imperial),
            other => Err(format!("Unsupported units: {}", other)),
        }
    }
}

/// Geographic coordinate pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }

    /// Stable identifier used in cache keys (4 decimal places, roughly 11m)
    pub fn cache_id(&self) -> String {
        format!("{:.4},{:.4}", self.lat, self.lon)
    }
}

/// Weather condition as reported by the Gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Condition {
    pub id: u32,
    pub main: String,
    pub description: String,
    pub icon: String,
}

/// Current conditions for one location at one observation time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherSnapshot {
    pub name: String,
    pub country: String,
    pub coord: Coordinates,
    pub temperature: f64,
    pub feels_like: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub humidity: u32,
    pub pressure: u32,
    pub wind_speed: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<u32>,
    pub sunrise: i64,
    pub sunset: i64,
    pub condition: Condition,
    /// Observation time (unix seconds)
    pub observed_at: i64,
    /// Shift from UTC in seconds
    #[serde(default)]
    pub timezone_offset: i32,
}

/// Gateway mode used to produce a forecast series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMode {
    /// 5 day / 3 hour forecast
    #[default]
    ThreeHourly,
    /// One Call daily forecast
    Daily,
}

/// One period of a forecast series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastPeriod {
    pub timestamp: i64,
    pub temperature: f64,
    pub feels_like: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub humidity: u32,
    pub pressure: u32,
    pub wind_speed: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<u32>,
    pub precipitation_probability: f64,
    pub condition: Condition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastLocation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    pub coord: Coordinates,
}

/// Ordered forecast periods for one location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastSeries {
    pub location: ForecastLocation,
    pub mode: ForecastMode,
    pub timezone_offset: i32,
    pub periods: Vec<ForecastPeriod>,
}

impl ForecastSeries {
    /// Build a series, sorting periods by timestamp ascending
    pub fn new(
        location: ForecastLocation,
        mode: ForecastMode,
        timezone_offset: i32,
        mut periods: Vec<ForecastPeriod>,
    ) -> Self {
        periods.sort_by_key(|p| p.timestamp);
        Self {
            location,
            mode,
            timezone_offset,
            periods,
        }
    }

    /// Pick one period per local calendar day: the one closest to midday.
    ///
    /// Days keep their chronological order; at most `limit` days are returned.
    pub fn daily_representatives(&self, limit: usize) -> Vec<&ForecastPeriod> {
        let offset = FixedOffset::east_opt(self.timezone_offset).unwrap_or_else(|| Utc.fix());

        let mut picked: Vec<(NaiveDate, i64, &ForecastPeriod)> = Vec::new();

        for period in &self.periods {
            let Some(utc) = DateTime::from_timestamp(period.timestamp, 0) else {
                continue;
            };
            let local = utc.with_timezone(&offset);
            let distance = (i64::from(local.hour()) * 3600 + i64::from(local.minute()) * 60
                - 12 * 3600)
                .abs();

            match picked.last_mut() {
                Some((day, best, slot)) if *day == local.date_naive() => {
                    if distance < *best {
                        *best = distance;
                        *slot = period;
                    }
                }
                _ => picked.push((local.date_naive(), distance, period)),
            }
        }

        picked.into_iter().take(limit).map(|(_, _, p)| p).collect()
    }
}

// ============================================================================
// OpenWeatherMap responses (internal)
// These structs deserialize the raw API response; not all fields are used
// ============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct OwmCoord {
    lat: f64,
    lon: f64,
}

impl From<OwmCoord> for Coordinates {
    fn from(c: OwmCoord) -> Self {
        Coordinates::new(c.lat, c.lon)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OwmCondition {
    id: u32,
    main: String,
    description: String,
    icon: String,
}

impl From<OwmCondition> for Condition {
    fn from(w: OwmCondition) -> Self {
        Condition {
            id: w.id,
            main: w.main,
            description: w.description,
            icon: w.icon,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct OwmMain {
    temp: f64,
    feels_like: f64,
    temp_min: f64,
    temp_max: f64,
    pressure: u32,
    humidity: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OwmWind {
    speed: f64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OwmSys {
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    sunrise: i64,
    #[serde(default)]
    sunset: i64,
}

/// Response of `GET /weather`
#[derive(Debug, Deserialize)]
pub(crate) struct OwmCurrentResponse {
    coord: OwmCoord,
    weather: Vec<OwmCondition>,
    main: OwmMain,
    visibility: Option<u32>,
    wind: OwmWind,
    dt: i64,
    sys: OwmSys,
    #[serde(default)]
    timezone: i32,
    name: String,
}

impl OwmCurrentResponse {
    pub(crate) fn into_snapshot(self) -> Result<WeatherSnapshot, GatewayError> {
        let condition = self.weather.into_iter().next().ok_or_else(|| {
            GatewayError::InvalidResponse("No weather information available".to_string())
        })?;

        Ok(WeatherSnapshot {
            name: self.name,
            country: self.sys.country.unwrap_or_default(),
            coord: self.coord.into(),
            temperature: self.main.temp,
            feels_like: self.main.feels_like,
            temp_min: self.main.temp_min,
            temp_max: self.main.temp_max,
            humidity: self.main.humidity,
            pressure: self.main.pressure,
            wind_speed: self.wind.speed,
            visibility: self.visibility,
            sunrise: self.sys.sunrise,
            sunset: self.sys.sunset,
            condition: condition.into(),
            observed_at: self.dt,
            timezone_offset: self.timezone,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct OwmForecastEntry {
    dt: i64,
    main: OwmMain,
    weather: Vec<OwmCondition>,
    wind: OwmWind,
    visibility: Option<u32>,
    #[serde(default)]
    pop: f64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OwmForecastCity {
    name: Option<String>,
    coord: OwmCoord,
    country: Option<String>,
    #[serde(default)]
    timezone: i32,
}

/// Response of `GET /forecast` (5 day / 3 hour)
#[derive(Debug, Deserialize)]
pub(crate) struct OwmForecastResponse {
    list: Vec<OwmForecastEntry>,
    city: OwmForecastCity,
}

impl OwmForecastResponse {
    pub(crate) fn into_series(self) -> ForecastSeries {
        let periods = self
            .list
            .into_iter()
            .map(|e| ForecastPeriod {
                timestamp: e.dt,
                temperature: e.main.temp,
                feels_like: e.main.feels_like,
                temp_min: e.main.temp_min,
                temp_max: e.main.temp_max,
                humidity: e.main.humidity,
                pressure: e.main.pressure,
                wind_speed: e.wind.speed,
                visibility: e.visibility,
                precipitation_probability: e.pop,
                condition: e.weather.into_iter().next().map(Into::into).unwrap_or_default(),
            })
            .collect();

        ForecastSeries::new(
            ForecastLocation {
                name: self.city.name,
                country: self.city.country,
                coord: self.city.coord.into(),
            },
            ForecastMode::ThreeHourly,
            self.city.timezone,
            periods,
        )
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct OwmDailyTemperature {
    day: f64,
    min: f64,
    max: f64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OwmDailyFeelsLike {
    day: f64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OwmDailyEntry {
    dt: i64,
    temp: OwmDailyTemperature,
    feels_like: OwmDailyFeelsLike,
    pressure: u32,
    humidity: u32,
    wind_speed: f64,
    weather: Vec<OwmCondition>,
    #[serde(default)]
    pop: f64,
}

/// Response of `GET /onecall` restricted to daily periods
#[derive(Debug, Deserialize)]
pub(crate) struct OwmOneCallResponse {
    lat: f64,
    lon: f64,
    #[serde(default)]
    timezone_offset: i32,
    #[serde(default)]
    daily: Vec<OwmDailyEntry>,
}

impl OwmOneCallResponse {
    pub(crate) fn into_series(self) -> ForecastSeries {
        let periods = self
            .daily
            .into_iter()
            .map(|d| ForecastPeriod {
                timestamp: d.dt,
                temperature: d.temp.day,
                feels_like: d.feels_like.day,
                temp_min: d.temp.min,
                temp_max: d.temp.max,
                humidity: d.humidity,
                pressure: d.pressure,
                wind_speed: d.wind_speed,
                visibility: None,
                precipitation_probability: d.pop,
                condition: d.weather.into_iter().next().map(Into::into).unwrap_or_default(),
            })
            .collect();

        ForecastSeries::new(
            ForecastLocation {
                name: None,
                country: None,
                coord: Coordinates::new(self.lat, self.lon),
            },
            ForecastMode::Daily,
            self.timezone_offset,
            periods,
        )
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct OwmErrorBody {
    pub(crate) message: String,
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_units_parse() {
        assert_eq!("metric".parse::<Units>(), Ok(Units::Metric));
        assert_eq!(" Imperial ".parse::<Units>(), Ok(Units::Imperial));
        assert!("kelvin".parse::<Units>().is_err());
    }

    #[test]
    fn test_coordinates_validation() {
        assert!(Coordinates::new(41.8781, -87.6298).is_valid());
        assert!(!Coordinates::new(91.0, 0.0).is_valid());
        assert!(!Coordinates::new(0.0, -181.0).is_valid());
    }

    #[test]
    fn test_coordinates_cache_id_rounds() {
        assert_eq!(Coordinates::new(41.878123, -87.62981).cache_id(), "41.8781,-87.6298");
    }

    #[test]
    fn test_current_response_into_snapshot() {
        let raw: OwmCurrentResponse = serde_json::from_value(serde_json::json!({
            "coord": {"lon": -0.1257, "lat": 51.5085},
            "weather": [{"id": 500, "main": "Rain", "description": "light rain", "icon": "10d"}],
            "main": {"temp": 12.3, "feels_like": 11.0, "temp_min": 10.9, "temp_max": 13.4,
                     "pressure": 1008, "humidity": 81},
            "visibility": 9000,
            "wind": {"speed": 5.14, "deg": 230},
            "dt": 1700000000,
            "sys": {"country": "GB", "sunrise": 1699987000, "sunset": 1700019000},
            "timezone": 0,
            "name": "London"
        }))
        .unwrap();

        let snapshot = raw.into_snapshot().unwrap();
        assert_eq!(snapshot.name, "London");
        assert_eq!(snapshot.country, "GB");
        assert_eq!(snapshot.condition.description, "light rain");
        assert_eq!(snapshot.temp_max, 13.4);
        assert_eq!(snapshot.visibility, Some(9000));
    }

    #[test]
    fn test_current_response_without_conditions_is_invalid() {
        let raw: OwmCurrentResponse = serde_json::from_value(serde_json::json!({
            "coord": {"lon": 0.0, "lat": 0.0},
            "weather": [],
            "main": {"temp": 1.0, "feels_like": 1.0, "temp_min": 1.0, "temp_max": 1.0,
                     "pressure": 1000, "humidity": 50},
            "wind": {"speed": 1.0},
            "dt": 1,
            "sys": {},
            "name": "Nowhere"
        }))
        .unwrap();

        assert!(matches!(
            raw.into_snapshot(),
            Err(GatewayError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_forecast_series_is_sorted_and_keeps_duplicates() {
        let series = series(vec![period(300, 3.0), period(100, 1.0), period(100, 1.5)]);
        let stamps: Vec<i64> = series.periods.iter().map(|p| p.timestamp).collect();
        assert_eq!(stamps, vec![100, 100, 300]);
    }

    #[test]
    fn test_daily_representatives_pick_midday() {
        // 2023-11-14 00:00 UTC
        let day = 1_699_920_000;
        let periods = (0..16).map(|i| period(day + i * 3 * 3600, i as f64)).collect();
        let series = series(periods);

        let picked = series.daily_representatives(7);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0].timestamp, day + 12 * 3600);
        assert_eq!(picked[1].timestamp, day + 86400 + 12 * 3600);
    }

    #[test]
    fn test_daily_representatives_respects_limit_and_offset() {
        let day = 1_699_920_000;
        let periods = (0..40).map(|i| period(day + i * 3 * 3600, 0.0)).collect();
        let mut series = series(periods);
        // UTC+3: local midday is 09:00 UTC
        series.timezone_offset = 3 * 3600;

        let picked = series.daily_representatives(3);
        assert_eq!(picked.len(), 3);
        assert_eq!(picked[0].timestamp, day + 9 * 3600);
    }

    #[test]
    fn test_snapshot_json_roundtrip_uses_camel_case() {
        let json = serde_json::to_value(snapshot("Paris", "FR", 18.0)).unwrap();
        assert!(json.get("feelsLike").is_some());
        assert!(json.get("observedAt").is_some());
    }
}
