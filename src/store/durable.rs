use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexSet;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use super::kv::{JsonFileStore, KeyValueStore, MemoryStore};
use crate::gateway::{Units, WeatherSnapshot};
use crate::tracking::TrackedCity;

const ENTITIES_KEY: &str = "savedCities";
const LAST_SNAPSHOT_KEY: &str = "currentWeather";
const UNITS_KEY: &str = "unit";
const LANGUAGE_KEY: &str = "language";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to access stored {key}: {source}")]
    Io {
        key: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Failed to encode {key}: {source}")]
    Encode {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Store is unavailable: {0}")]
    Unavailable(#[source] io::Error),
}

/// Preferences as they were last saved; absent values fall back to config
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredPreferences {
    pub units: Option<Units>,
    pub language: Option<String>,
}

/// Typed access to tracked cities, the last-known snapshot and preferences.
///
/// Reads never fail: missing, unreadable or corrupted values are reported as
/// absent and logged.
#[derive(Clone)]
pub struct DurableStore {
    kv: Arc<dyn KeyValueStore>,
}

impl DurableStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub fn file(dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(JsonFileStore::new(dir)))
    }

    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    fn read<T: DeserializeOwned>(&self, key: &'static str) -> Option<T> {
        let raw = match self.kv.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to read stored value, treating as absent");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "Stored value is corrupted, treating as absent");
                if let Err(e) = self.kv.remove(key) {
                    tracing::warn!(key, error = %e, "Failed to discard corrupted value");
                }
                None
            }
        }
    }

    fn write<T: Serialize + ?Sized>(&self, key: &'static str, value: &T) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(value)
            .map_err(|source| StoreError::Encode { key, source })?;
        self.kv
            .set(key, &content)
            .map_err(|source| StoreError::Io { key, source })
    }

    /// Saved cities in insertion order, without duplicate (name, country) pairs
    pub fn load_entities(&self) -> Vec<TrackedCity> {
        let cities: Vec<TrackedCity> = self.read(ENTITIES_KEY).unwrap_or_default();

        let mut seen = IndexSet::new();
        let total = cities.len();
        let cities: Vec<TrackedCity> = cities
            .into_iter()
            .filter(|city| seen.insert(city.identity()))
            .collect();

        if cities.len() < total {
            tracing::warn!(
                dropped = total - cities.len(),
                "Dropped duplicate cities from stored collection"
            );
        }

        tracing::debug!(count = cities.len(), "Loaded tracked cities");
        cities
    }

    pub fn save_entities(&self, cities: &[TrackedCity]) -> Result<(), StoreError> {
        self.write(ENTITIES_KEY, cities)?;
        tracing::debug!(count = cities.len(), "Saved tracked cities");
        Ok(())
    }

    pub fn load_last_snapshot(&self) -> Option<WeatherSnapshot> {
        self.read(LAST_SNAPSHOT_KEY)
    }

    pub fn save_last_snapshot(&self, snapshot: &WeatherSnapshot) -> Result<(), StoreError> {
        self.write(LAST_SNAPSHOT_KEY, snapshot)
    }

    pub fn load_preferences(&self) -> StoredPreferences {
        StoredPreferences {
            units: self.read(UNITS_KEY),
            language: self.read(LANGUAGE_KEY),
        }
    }

    pub fn save_units(&self, units: Units) -> Result<(), StoreError> {
        self.write(UNITS_KEY, &units)
    }

    pub fn save_language(&self, language: &str) -> Result<(), StoreError> {
        self.write(LANGUAGE_KEY, language)
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.kv.clear().map_err(StoreError::Unavailable)?;
        tracing::info!("Cleared durable store");
        Ok(())
    }

    /// Verify the store can accept writes
    pub fn check(&self) -> Result<(), StoreError> {
        self.kv.check().map_err(StoreError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::models::fixtures::snapshot;

    fn city(id: i64, name: &str, country: &str) -> TrackedCity {
        TrackedCity::from_snapshot(id, snapshot(name, country, 12.5))
    }

    #[test]
    fn test_entities_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DurableStore::file(dir.path());

        let mut bare = city(3, "Oslo", "NO");
        bare.weather = None;
        let cities = vec![city(1, "London", "GB"), city(2, "Paris", "FR"), bare];

        store.save_entities(&cities).unwrap();

        // A fresh adapter over the same directory sees the same collection
        let reopened = DurableStore::file(dir.path());
        assert_eq!(reopened.load_entities(), cities);
    }

    #[test]
    fn test_corrupted_entities_are_absent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("savedCities.json"), "[{not json").unwrap();

        let store = DurableStore::file(dir.path());
        assert!(store.load_entities().is_empty());
        assert!(!dir.path().join("savedCities.json").exists());

        // And the store keeps working afterwards
        store.save_entities(&[city(1, "Rome", "IT")]).unwrap();
        assert_eq!(store.load_entities().len(), 1);
    }

    #[test]
    fn test_duplicate_entities_dropped_on_load() {
        let store = DurableStore::memory();
        let cities = vec![
            city(1, "London", "GB"),
            city(2, "london", "gb"),
            city(3, "London", "CA"),
        ];
        store.save_entities(&cities).unwrap();

        let loaded = store.load_entities();
        assert_eq!(
            loaded.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![1, 3]
        );
    }

    #[test]
    fn test_last_snapshot() {
        let store = DurableStore::memory();
        assert_eq!(store.load_last_snapshot(), None);

        let snap = snapshot("Madrid", "ES", 25.0);
        store.save_last_snapshot(&snap).unwrap();
        assert_eq!(store.load_last_snapshot(), Some(snap));
    }

    #[test]
    fn test_preferences_and_corrupted_scalar() {
        let dir = tempfile::tempdir().unwrap();
        let store = DurableStore::file(dir.path());
        assert_eq!(store.load_preferences(), StoredPreferences::default());

        store.save_units(Units::Imperial).unwrap();
        store.save_language("tr").unwrap();
        assert_eq!(
            store.load_preferences(),
            StoredPreferences {
                units: Some(Units::Imperial),
                language: Some("tr".to_string()),
            }
        );

        std::fs::write(dir.path().join("unit.json"), "kelvin").unwrap();
        assert_eq!(store.load_preferences().units, None);
    }

    #[test]
    fn test_clear() {
        let store = DurableStore::memory();
        store.save_entities(&[city(1, "Lima", "PE")]).unwrap();
        store.save_last_snapshot(&snapshot("Lima", "PE", 18.0)).unwrap();

        store.clear().unwrap();

        assert!(store.load_entities().is_empty());
        assert!(store.load_last_snapshot().is_none());
    }
}
