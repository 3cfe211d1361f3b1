//! User profile endpoints.

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use database::{activation_list, entitlement, user};
use serde::Deserialize;
use tracing::info;

use crate::error::{ApiError, Result};
use crate::routes::analyze::parse_birth_date;
use crate::routes::{require_self, user_payload};
use crate::session::SessionUser;
use crate::state::AppState;

/// Grant given to allow-listed numbers when they complete their profile.
const ALLOW_LIST_VALID_DAYS: i64 = 7;
const ALLOW_LIST_MAX_CONVERSATIONS: i64 = 100;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileQuery {
    pub user_id: Option<String>,
}

/// `GET /api/user/profile` — the stored profile, entitlement flags, and
/// whether the phone number is on the activation allow-list.
pub async fn get_profile(
    State(state): State<AppState>,
    Extension(session): Extension<SessionUser>,
    Query(query): Query<ProfileQuery>,
) -> Result<Response> {
    let user_id = query
        .user_id
        .ok_or_else(|| ApiError::BadRequest("userId is required".to_string()))?;
    require_self(&session, &user_id)?;

    let pool = state.db.pool();
    let current = user::get_user(pool, &user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let is_in_activation_list = match &current.phone_number {
        Some(phone) => activation_list::is_phone_allow_listed(pool, phone).await?,
        None => false,
    };

    Ok(Json(serde_json::json!({
        "success": true,
        "user": user_payload(&current),
        "isInActivationList": is_in_activation_list,
    }))
    .into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdateRequest {
    pub user_id: Option<String>,
    pub name: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<String>,
    pub birth_time: Option<String>,
    pub birth_place: Option<String>,
    pub initial_question: Option<String>,
}

/// `PUT /api/user/profile` — partial profile update.
///
/// Allow-listed numbers are auto-activated on save; everyone else gets
/// `needPayment: true` so the client routes them to the purchase page.
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(session): Extension<SessionUser>,
    Json(req): Json<ProfileUpdateRequest>,
) -> Result<Response> {
    let user_id = req
        .user_id
        .ok_or_else(|| ApiError::BadRequest("userId is required".to_string()))?;
    require_self(&session, &user_id)?;

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
        initial_question: req.initial_question,
        ..Default::default()
    };
    if update.is_empty() {
        return Err(ApiError::BadRequest(
            "At least one field is required to update".to_string(),
        ));
    }

    let now = Utc::now();
    let pool = state.db.pool();

    let current = user::get_user(pool, &user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let mut updated = user::update_user(pool, &user_id, &update, now)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let allow_listed = match &current.phone_number {
        Some(phone) => activation_list::is_phone_allow_listed(pool, phone).await?,
        None => false,
    };

    // An allow-listed user becomes entitled the moment their profile is
    // saved; they never see the payment page.
    let (need_payment, message) = if allow_listed && !entitlement::is_activated(&updated) {
        if let Some(activated) = user::activate_user(
            pool,
            &user_id,
            ALLOW_LIST_VALID_DAYS,
            ALLOW_LIST_MAX_CONVERSATIONS,
            now,
        )
        .await?
        {
            info!(user_id = %user_id, "Auto-activated allow-listed user on profile save");
            updated = activated;
        }
        (false, "信息保存成功，已自动激活")
    } else if allow_listed || entitlement::is_activated(&updated) {
        (false, "信息保存成功")
    } else {
        (true, "信息保存成功，请完成支付后开始咨询")
    };

    Ok(Json(serde_json::json!({
        "success": true,
        "needPayment": need_payment,
        "user": user_payload(&updated),
        "message": message,
    }))
    .into_response())
}

/// Parse a client-supplied birth date into a UTC midnight timestamp.
pub(crate) fn parse_birth_date_utc(value: &str) -> Result<DateTime<Utc>> {
    let date = parse_birth_date(value)
        .ok_or_else(|| ApiError::BadRequest("Invalid birthDate format".to_string()))?;
    date.and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .ok_or_else(|| ApiError::BadRequest("Invalid birthDate format".to_string()))
}
