use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AppConfig;
use crate::error::HttpError;
use crate::gateway::Units;
use crate::store::{StoreError, StoredPreferences};
use crate::AppState;

#[derive(Error, Debug)]
pub enum PreferencesError {
    #[error("Unsupported language code: {0}")]
    InvalidLanguage(String),

    #[error("Failed to save preferences: {0}")]
    Storage(#[from] StoreError),
}

impl HttpError for PreferencesError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidLanguage(_) => StatusCode::BAD_REQUEST,
            Self::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::InvalidLanguage(_) => Some("INVALID_LANGUAGE"),
            Self::Storage(_) => Some("STORE_UNAVAILABLE"),
        }
    }
}

crate::impl_into_response!(PreferencesError);

/// Effective unit system and language
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preferences {
    pub units: Units,
    pub language: String,
}

impl Preferences {
    /// Stored values win; anything missing comes from configuration
    pub fn resolve(stored: StoredPreferences, config: &AppConfig) -> Self {
        Self {
            units: stored.units.unwrap_or(config.units),
            language: stored.language.unwrap_or_else(|| config.language.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdatePreferences {
    pub units: Option<Units>,
    pub language: Option<String>,
}

/// Normalize a language code such as "en", "PT_BR" or "zh-cn"
pub fn normalize_language(language: &str) -> Result<String, PreferencesError> {
    let code = language.trim().to_ascii_lowercase().replace('-', "_");
    let valid = match code.split_once('_') {
        Some((lang, region)) => is_alpha(lang, 2) && is_alpha(region, 2),
        None => is_alpha(&code, 2),
    };

    if valid {
        Ok(code)
    } else {
        Err(PreferencesError::InvalidLanguage(language.to_string()))
    }
}

fn is_alpha(part: &str, len: usize) -> bool {
    part.len() == len && part.chars().all(|c| c.is_ascii_alphabetic())
}

pub async fn get_preferences(State(state): State<AppState>) -> Json<Preferences> {
    Json(Preferences::resolve(
        state.store.load_preferences(),
        &state.config,
    ))
}

/// Save new defaults. Cached entries stay valid: keys include units and language.
pub async fn update_preferences(
    State(state): State<AppState>,
    Json(update): Json<UpdatePreferences>,
) -> Result<Json<Preferences>, PreferencesError> {
    let language = update
        .language
        .as_deref()
        .map(normalize_language)
        .transpose()?;

    if let Some(units) = update.units {
        state.store.save_units(units)?;
    }
    if let Some(language) = &language {
        state.store.save_language(language)?;
    }

    let preferences = Preferences::resolve(state.store.load_preferences(), &state.config);
    tracing::info!(units = %preferences.units, language = %preferences.language, "Preferences updated");
    Ok(Json(preferences))
}
