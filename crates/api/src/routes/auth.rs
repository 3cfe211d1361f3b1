//! Phone-verification login.

use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, Utc};
use database::{activation_list, user, validation};
use rand::Rng;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{ApiError, Result};
use crate::routes::user_payload;
use crate::session;
use crate::state::AppState;

/// Login-code lifetime in seconds.
const CODE_TTL_SECS: i64 = 300;

/// Grant given to allow-listed phone numbers on first login.
const ALLOW_LIST_VALID_DAYS: i64 = 7;
const ALLOW_LIST_MAX_CONVERSATIONS: i64 = 100;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendCodeRequest {
    #[serde(default)]
    pub phone_number: String,
}

/// `POST /api/auth/send-code` — store a fresh 6-digit code for the phone
/// number and hand it to the SMS provider.
pub async fn send_code(
    State(state): State<AppState>,
    Json(req): Json<SendCodeRequest>,
) -> Result<Response> {
    if validation::validate_phone_number(&req.phone_number).is_err() {
        return Err(ApiError::BadRequest(
            "Invalid phone number format".to_string(),
        ));
    }

    let now = Utc::now();
    let pool = state.db.pool();
    let code = rand::thread_rng().gen_range(100_000..1_000_000u32).to_string();

    // Unknown numbers get an identity-only row so the code has a home.
    if user::get_user_by_phone(pool, &req.phone_number).await?.is_none() {
        let created = user::create_placeholder(pool, &req.phone_number, now).await?;
        info!(user_id = %created.id, "Created placeholder user for login code");
    }

    user::save_verification_code(pool, &req.phone_number, &code, CODE_TTL_SECS, now).await?;

    state
        .sms
        .send_code(&req.phone_number, &code)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let mut body = serde_json::json!({
        "success": true,
        "message": "验证码已发送",
        "expiresAt": now + Duration::seconds(CODE_TTL_SECS),
    });
    if state.config.show_verification_code {
        body["code"] = serde_json::Value::String(code);
    }

    Ok(Json(body).into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub code: String,
}

/// `POST /api/auth/login` — verify the code and open a signed session.
///
/// Unknown or unactivated numbers on the activation allow-list are
/// activated on the spot with the standard free grant; everyone else
/// gets back their entitlement state so the client can route them to
/// payment.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Response> {
    if req.phone_number.is_empty() || req.code.is_empty() {
        return Err(ApiError::BadRequest(
            "Phone number and verification code are required".to_string(),
        ));
    }

    let now = Utc::now();
    let pool = state.db.pool();

    if !user::verify_code(pool, &req.phone_number, &req.code, now).await? {
        return Err(ApiError::Unauthorized(
            "Invalid or expired verification code".to_string(),
        ));
    }

    let mut current = match user::get_user_by_phone(pool, &req.phone_number).await? {
        Some(found) => found,
        None => {
            // Placeholder creation happens in send-code, so this only
            // triggers for rows deleted in between. Allow-listed numbers
            // still get an account.
            if activation_list::is_phone_allow_listed(pool, &req.phone_number).await? {
                let created = user::create_activated_user(
                    pool,
                    &req.phone_number,
                    ALLOW_LIST_VALID_DAYS,
                    ALLOW_LIST_MAX_CONVERSATIONS,
                    now,
                )
                .await?;
                info!(user_id = %created.id, "Auto-activated allow-listed user at login");
                created
            } else {
                return Err(ApiError::NotFound(
                    "User not found. Please contact administrator to create account.".to_string(),
                ));
            }
        }
    };

    user::clear_verification_code(pool, &req.phone_number, now).await?;

    if !current.is_active {
        return Err(ApiError::Forbidden("Account is disabled".to_string()));
    }

    let mut message = "Login successful";

    if !database::entitlement::is_activated(&current) {
        if activation_list::is_phone_allow_listed(pool, &req.phone_number).await? {
            if let Some(activated) = user::activate_user(
                pool,
                &current.id,
                ALLOW_LIST_VALID_DAYS,
                ALLOW_LIST_MAX_CONVERSATIONS,
                now,
            )
            .await?
            {
                info!(user_id = %activated.id, "Auto-activated allow-listed user at login");
                current = activated;
            }
        } else {
            message = "Account exists but not activated. Please complete payment to activate.";
        }
    } else if database::entitlement::is_expired(&current, now) {
        warn!(user_id = %current.id, "Expired account logged in");
        message = "Account has expired. Please renew to continue.";
    }

    let body = serde_json::json!({
        "success": true,
        "user": user_payload(&current),
        "message": message,
    });

    let cookie = session::issue_user_cookie(&current.id, &state.config.session_secret, now);
    respond_with_cookie(body, &cookie)
}

/// Attach a Set-Cookie header to a JSON response.
pub(crate) fn respond_with_cookie(body: serde_json::Value, cookie: &str) -> Result<Response> {
    let mut response = (StatusCode::OK, Json(body)).into_response();
    let value = HeaderValue::from_str(cookie)
        .map_err(|_| ApiError::Internal("Invalid cookie value".to_string()))?;
    response.headers_mut().append(header::SET_COOKIE, value);
    Ok(response)
}
