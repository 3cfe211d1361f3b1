//! Route handlers for the API service.

pub mod admin;
pub mod analyze;
pub mod auth;
pub mod chat;
pub mod conversations;
pub mod health;
pub mod payment;
pub mod profile;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use database::{entitlement, User};

use crate::error::ApiError;
use crate::session;
use crate::state::AppState;

/// Build the router with all routes.
pub fn router(state: AppState) -> Router {
    let user_routes = Router::new()
        .route(
            "/api/user/profile",
            get(profile::get_profile).put(profile::update_profile),
        )
        .route(
            "/api/user/conversations",
            get(conversations::list).delete(conversations::delete_all),
        )
        .route("/api/payment/order", post(payment::create_order))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_user,
        ));

    let admin_routes = Router::new()
        .route(
            "/api/admin/users",
            get(admin::list_users)
                .post(admin::activate_user)
                .put(admin::update_user),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin,
        ));

    Router::new()
        // Health check
        .route("/health", get(health::health))
        // Public endpoints
        .route("/api/auth/send-code", post(auth::send_code))
        .route("/api/auth/login", post(auth::login))
        .route("/api/admin/login", post(admin::login))
        .route("/api/fortune/chat", post(chat::chat))
        .route("/api/fortune/analyze", post(analyze::analyze))
        .route("/api/payment/callback/:method", post(payment::callback))
        .route("/api/payment/mock", get(payment::mock_pay))
        // Guarded endpoints
        .merge(user_routes)
        .merge(admin_routes)
        .with_state(state)
}

/// Reject requests without a valid signed user session cookie. The
/// verified subject rides along in request extensions for handlers to
/// check against the user id they are asked to act on.
async fn require_user(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let subject = session::verified_subject(
        request.headers(),
        session::USER_COOKIE,
        &state.config.session_secret,
        Utc::now(),
    );
    match subject {
        Some(subject) => {
            request.extensions_mut().insert(session::SessionUser(subject));
            next.run(request).await
        }
        None => ApiError::Unauthorized("Login required".to_string()).into_response(),
    }
}

/// A guarded handler may only act on the session's own user.
pub(crate) fn require_self(session: &session::SessionUser, user_id: &str) -> Result<(), ApiError> {
    if session.0 == user_id {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "Session does not match the requested user".to_string(),
        ))
    }
}

/// Reject requests without a valid signed admin session cookie.
async fn require_admin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let subject = session::verified_subject(
        request.headers(),
        session::ADMIN_COOKIE,
        &state.config.session_secret,
        Utc::now(),
    );
    match subject.as_deref() {
        Some(session::ADMIN_SUBJECT) => next.run(request).await,
        _ => ApiError::Unauthorized("Admin login required".to_string()).into_response(),
    }
}

/// The user JSON shape shared by login, profile, and activation
/// responses: stored fields plus the computed entitlement flags.
pub(crate) fn user_payload(user: &User) -> serde_json::Value {
    let now = Utc::now();
    let activated = entitlement::is_activated(user);
    let expired = activated && entitlement::is_expired(user, now);

    serde_json::json!({
        "id": user.id,
        "phoneNumber": user.phone_number,
        "name": user.name,
        "gender": user.gender,
        "birthDate": user.birth_date,
        "birthTime": user.birth_time,
        "birthPlace": user.birth_place,
        "initialQuestion": user.initial_question,
        "metadata": user.metadata,
        "isActive": user.is_active,
        "isActivated": activated,
        "expired": expired,
        "hasCompleteFortuneInfo": entitlement::has_complete_fortune_info(user),
        "activatedAt": user.activated_at,
        "expiresAt": user.expires_at,
        "maxConversations": user.max_conversations,
        "usedConversations": user.used_conversations,
        "remainingConversations": entitlement::remaining_conversations(user),
        "limitExceeded": entitlement::is_quota_exceeded(user),
    })
}
