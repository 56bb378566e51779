use serde::{Deserialize, Serialize};

use crate::gateway::{Coordinates, WeatherSnapshot};

/// A user-saved city and the weather last fetched for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedCity {
    /// Creation time in unix milliseconds, unique within the collection
    pub id: i64,
    pub name: String,
    pub country: String,
    pub coord: Coordinates,
    /// Last successful refresh in unix milliseconds
    pub last_updated: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<WeatherSnapshot>,
}

impl TrackedCity {
    pub fn from_snapshot(id: i64, snapshot: WeatherSnapshot) -> Self {
        Self {
            id,
            name: snapshot.name.clone(),
            country: snapshot.country.clone(),
            coord: snapshot.coord,
            last_updated: id,
            weather: Some(snapshot),
        }
    }

    /// Case-insensitive (name, country) pair used for uniqueness
    pub fn identity(&self) -> (String, String) {
        (self.name.to_lowercase(), self.country.to_lowercase())
    }

    /// Whether a user query names this city. Without a country only the name is compared.
    pub fn matches(&self, name: &str, country: Option<&str>) -> bool {
        let (own_name, own_country) = self.identity();
        own_name == name.trim().to_lowercase()
            && country.is_none_or(|c| own_country == c.trim().to_lowercase())
    }

    /// Gateway query string, e.g. "London,GB"
    pub fn query(&self) -> String {
        if self.country.is_empty() {
            self.name.clone()
        } else {
            format!("{},{}", self.name, self.country)
        }
    }

    /// Copy carrying a new snapshot; the refresh time never moves backwards
    pub fn with_weather(&self, snapshot: WeatherSnapshot, refreshed_at: i64) -> Self {
        Self {
            last_updated: refreshed_at.max(self.last_updated + 1),
            weather: Some(snapshot),
            ..self.clone()
        }
    }
}

/// Split "Paris, FR" into its name and optional country parts
pub fn parse_city_query(query: &str) -> (&str, Option<&str>) {
    match query.split_once(',') {
        Some((name, country)) if !country.trim().is_empty() => (name.trim(), Some(country.trim())),
        Some((name, _)) => (name.trim(), None),
        None => (query.trim(), None),
    }
}

/// Bulk refresh progress; (0, 0) while idle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshProgress {
    pub completed: usize,
    pub total: usize,
}

impl RefreshProgress {
    pub fn is_running(&self) -> bool {
        self.total > 0
    }
}

#[derive(Debug, Deserialize)]
pub struct AddCityRequest {
    /// City name, optionally followed by ",<country code>"
    pub name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RefreshFailure {
    pub id: i64,
    pub name: String,
    pub error: String,
}

/// Result of a bulk refresh run
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub total: usize,
    pub updated: usize,
    pub failed: Vec<RefreshFailure>,
    /// False when the refreshed collection could not be written to the store
    pub persisted: bool,
}
