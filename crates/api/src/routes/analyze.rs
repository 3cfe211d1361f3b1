//! Standalone first-reading analysis.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::NaiveDate;
use deepseek_brain::prompt::{self, SeekerProfile};
use serde::Deserialize;

use crate::error::{ApiError, Result};
use crate::routes::chat::relay_sse;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub birth_date: String,
    #[serde(default)]
    pub birth_time: String,
    #[serde(default)]
    pub birth_place: String,
}

/// `POST /api/fortune/analyze` — run a full reading from submitted birth
/// details, streamed as SSE. No account or history involved; nothing is
/// persisted.
pub async fn analyze(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Response> {
    if req.name.is_empty()
        || req.gender.is_empty()
        || req.birth_date.is_empty()
        || req.birth_time.is_empty()
        || req.birth_place.is_empty()
    {
        return Err(ApiError::BadRequest("Missing required fields".to_string()));
    }

    let birth_date = parse_birth_date(&req.birth_date)
        .ok_or_else(|| ApiError::BadRequest("Invalid birth date format".to_string()))?;

    let profile = SeekerProfile {
        name: req.name,
        gender: req.gender,
        birth_date: Some(birth_date),
        birth_time: req.birth_time,
        birth_place: req.birth_place,
    };

    let messages = prompt::analysis_messages(&profile);
    let stream = state.brain.chat_stream(messages).await?;

    Ok(relay_sse(stream, None).into_response())
}

/// Accept `YYYY-MM-DD` or a full RFC 3339 timestamp.
pub(crate) fn parse_birth_date(value: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    chrono::DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.date_naive())
}
