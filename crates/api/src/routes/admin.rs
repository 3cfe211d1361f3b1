//! Admin panel endpoints.

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use database::{entitlement, user, User};
use serde::Deserialize;
use tracing::info;

use crate::error::{ApiError, Result};
use crate::routes::auth::respond_with_cookie;
use crate::routes::profile::parse_birth_date_utc;
use crate::routes::user_payload;
use crate::session;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AdminLoginRequest {
    #[serde(default)]
    pub password: String,
}

/// `POST /api/admin/login` — open a signed admin session.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<AdminLoginRequest>,
) -> Result<Response> {
    if req.password.is_empty() {
        return Err(ApiError::BadRequest("Password is required".to_string()));
    }
    if req.password != state.config.admin_password {
        return Err(ApiError::Unauthorized("Invalid password".to_string()));
    }

    info!("Admin logged in");
    let cookie = session::issue_admin_cookie(&state.config.session_secret, Utc::now());
    respond_with_cookie(
        serde_json::json!({
            "success": true,
            "message": "Admin login successful",
        }),
        &cookie,
    )
}

fn default_limit() -> i64 {
    50
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUsersQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
    pub is_active: Option<bool>,
}

fn admin_row(current: &User) -> serde_json::Value {
    let now = Utc::now();
    serde_json::json!({
        "id": current.id,
        "phoneNumber": current.phone_number,
        "name": current.name,
        "gender": current.gender,
        "birthDate": current.birth_date,
        "birthTime": current.birth_time,
        "birthPlace": current.birth_place,
        "isActive": current.is_active,
        "isActivated": entitlement::is_activated(current),
        "isExpired": entitlement::is_activated(current) && entitlement::is_expired(current, now),
        "isLimitExceeded": entitlement::is_quota_exceeded(current),
        "activatedAt": current.activated_at,
        "expiresAt": current.expires_at,
        "maxConversations": current.max_conversations,
        "usedConversations": current.used_conversations,
        "remainingConversations": entitlement::remaining_conversations(current),
        "createdAt": current.created_at,
        "updatedAt": current.updated_at,
    })
}

/// `GET /api/admin/users` — paginated user list with computed
/// entitlement flags per row.
pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
) -> Result<Response> {
    let opts = user::ListUsers {
        skip: query.skip,
        limit: query.limit,
        is_active: query.is_active,
    };
    let users = user::list_users(state.db.pool(), &opts).await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "users": users.iter().map(admin_row).collect::<Vec<_>>(),
        "total": users.len(),
    }))
    .into_response())
}

fn default_valid_days() -> i64 {
    7
}

fn default_max_conversations() -> i64 {
    50
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateRequest {
    pub user_id: Option<String>,
    #[serde(default = "default_valid_days")]
    pub valid_days: i64,
    #[serde(default = "default_max_conversations")]
    pub max_conversations: i64,
}

/// `POST /api/admin/users` — manually grant an entitlement.
pub async fn activate_user(
    State(state): State<AppState>,
    Json(req): Json<ActivateRequest>,
) -> Result<Response> {
    let user_id = req
        .user_id
        .ok_or_else(|| ApiError::BadRequest("User ID is required".to_string()))?;

    let activated = user::activate_user(
        state.db.pool(),
        &user_id,
        req.valid_days,
        req.max_conversations,
        Utc::now(),
    )
    .await?
    .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    info!(
        user_id = %activated.id,
        valid_days = req.valid_days,
        max_conversations = req.max_conversations,
        "Admin activated user"
    );

    Ok(Json(serde_json::json!({
        "success": true,
        "message": "User activated successfully",
        "user": user_payload(&activated),
    }))
    .into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUpdateRequest {
    pub user_id: Option<String>,
    pub name: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<String>,
    pub birth_time: Option<String>,
    pub birth_place: Option<String>,
    pub phone_number: Option<String>,
    pub is_active: Option<bool>,
}

/// `PUT /api/admin/users` — edit any user field, including the phone
/// number and the soft-disable flag.
pub async fn update_user(
    State(state): State<AppState>,
    Json(req): Json<AdminUpdateRequest>,
) -> Result<Response> {
    let user_id = req
        .user_id
        .ok_or_else(|| ApiError::BadRequest("User ID is required".to_string()))?;

    let birth_date = match &req.birth_date {
        Some(raw) => Some(parse_birth_date_utc(raw)?),
        None => None,
    };

    let update = user::UserUpdate {
        name: req.name,
        gender: req.gender,
        birth_date,
        birth_time: req.birth_time,
        birth_place: req.birth_place,
        phone_number: req.phone_number,
        is_active: req.is_active,
        ..Default::default()
    };

    let updated = user::update_user(state.db.pool(), &user_id, &update, Utc::now())
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(Json(serde_json::json!({
        "success": true,
        "message": "User updated successfully",
        "user": user_payload(&updated),
    }))
    .into_response())
}
