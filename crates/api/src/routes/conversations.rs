//! Conversation history endpoints.

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use database::{conversation, Conversation};
use serde::Deserialize;
use tracing::info;

use crate::error::{ApiError, Result};
use crate::routes::require_self;
use crate::session::SessionUser;
use crate::state::AppState;

fn default_limit() -> i64 {
    50
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub user_id: Option<String>,
    pub role: Option<String>,
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn turn_payload(turn: &Conversation) -> serde_json::Value {
    serde_json::json!({
        "id": turn.id,
        "userId": turn.user_id,
        "role": turn.role,
        "content": turn.content,
        "isOnTopic": turn.is_on_topic,
        "createdAt": turn.created_at,
    })
}

/// `GET /api/user/conversations` — newest-first turn history, optionally
/// filtered by role.
pub async fn list(
    State(state): State<AppState>,
    Extension(session): Extension<SessionUser>,
    Query(query): Query<ListQuery>,
) -> Result<Response> {
    let user_id = query
        .user_id
        .ok_or_else(|| ApiError::BadRequest("userId is required".to_string()))?;
    require_self(&session, &user_id)?;

    let opts = conversation::ListConversations {
        skip: query.skip,
        limit: query.limit,
        role: query.role,
    };
    let turns = conversation::list_for_display(state.db.pool(), &user_id, &opts).await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "conversations": turns.iter().map(turn_payload).collect::<Vec<_>>(),
        "count": turns.len(),
    }))
    .into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteQuery {
    pub user_id: Option<String>,
}

/// `DELETE /api/user/conversations` — wipe the user's history, reporting
/// how many turns were removed.
pub async fn delete_all(
    State(state): State<AppState>,
    Extension(session): Extension<SessionUser>,
    Query(query): Query<DeleteQuery>,
) -> Result<Response> {
    let user_id = query
        .user_id
        .ok_or_else(|| ApiError::BadRequest("userId is required".to_string()))?;
    require_self(&session, &user_id)?;

    let deleted = conversation::delete_all_for_user(state.db.pool(), &user_id).await?;
    info!(user_id = %user_id, deleted, "Deleted conversation history");

    Ok(Json(serde_json::json!({
        "success": true,
        "deletedCount": deleted,
        "message": format!("Successfully deleted {} conversations", deleted),
    }))
    .into_response())
}
