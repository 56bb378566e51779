use axum::{
    extract::{FromRequestParts, Path, Query},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::error::ErrorResponse;
use crate::gateway::Units;
use crate::preferences::{normalize_language, Preferences};
use crate::AppState;

/// Query parameters shared by weather and tracking routes
#[derive(Debug, Deserialize)]
pub struct LocaleQuery {
    pub city: Option<String>,
    /// metric or imperial
    pub units: Option<String>,
    pub lang: Option<String>,
}

/// Extracts city from either path parameter or query parameter
///
/// Checks path first, then falls back to query parameter.
#[derive(Debug)]
pub struct CityParam(pub Option<String>);

impl CityParam {
    pub fn into_inner(self) -> Option<String> {
        self.0
    }
}

impl<S> FromRequestParts<S> for CityParam
where
    S: Send + Sync,
{
    type Rejection = ParamRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Ok(Path(city)) = Path::<String>::from_request_parts(parts, state).await {
            if !city.is_empty() {
                return Ok(CityParam(Some(city)));
            }
        }

        if let Ok(Query(query)) = Query::<LocaleQuery>::from_request_parts(parts, state).await {
            return Ok(CityParam(query.city));
        }

        Ok(CityParam(None))
    }
}

/// Unit system and language for a request.
///
/// Taken from `?units=` / `?lang=`, then stored preferences, then configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Locale {
    pub units: Units,
    pub language: String,
}

impl FromRequestParts<AppState> for Locale {
    type Rejection = ParamRejection;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let query = Query::<LocaleQuery>::from_request_parts(parts, state)
            .await
            .map(|Query(q)| q)
            .map_err(|e| ParamRejection(e.body_text()))?;

        let defaults = Preferences::resolve(state.store.load_preferences(), &state.config);

        let units = match query.units.as_deref() {
            Some(units) => units.parse::<Units>().map_err(ParamRejection)?,
            None => defaults.units,
        };
        let language = match query.lang.as_deref() {
            Some(lang) => normalize_language(lang).map_err(|e| ParamRejection(e.to_string()))?,
            None => defaults.language,
        };

        Ok(Locale { units, language })
    }
}

/// Rejection for malformed request parameters
#[derive(Debug)]
pub struct ParamRejection(pub String);

impl IntoResponse for ParamRejection {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::with_code(self.0, "INVALID_PARAMETER")),
        )
            .into_response()
    }
}
