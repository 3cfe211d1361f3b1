//! The consultation chat relay.
//!
//! Proxies a question through the upstream model as an SSE stream of
//! `data: {"content": "..."}` frames with a terminal `data: [DONE]`.
//! A stream that ends without the sentinel was cut off and the client
//! must treat it as a failure.

use std::convert::Infallible;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use database::{conversation, entitlement, user};
use deepseek_brain::prompt::{self, SeekerProfile};
use deepseek_brain::ChatStream;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};

use crate::error::{ApiError, Result};
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub question: String,
    pub user_id: Option<String>,
}

/// `POST /api/fortune/chat` — answer a consultation question.
///
/// With a `userId` the entitlement gate runs first: an unactivated,
/// expired, disabled, or quota-exhausted account gets a 403 before
/// anything reaches the upstream. The quota is consumed up front, so a
/// client that disconnects mid-answer has still spent the turn.
pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Response> {
    if req.question.is_empty() {
        return Err(ApiError::BadRequest(
            "Invalid request: question is required".to_string(),
        ));
    }

    let now = Utc::now();
    let pool = state.db.pool();

    let mut history = Vec::new();
    let mut profile = None;

    if let Some(user_id) = &req.user_id {
        let current = user::get_user(pool, user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

        if !current.is_active {
            return Err(ApiError::Forbidden("Account is disabled".to_string()));
        }
        if !entitlement::is_activated(&current) {
            return Err(ApiError::Forbidden(
                "Account not activated. Please complete payment to activate.".to_string(),
            ));
        }
        if entitlement::is_expired(&current, now) {
            return Err(ApiError::Forbidden(
                "Account has expired. Please renew to continue.".to_string(),
            ));
        }
        if entitlement::is_quota_exceeded(&current) {
            let body = serde_json::json!({
                "error": "Conversation limit exceeded",
                "maxConversations": current.max_conversations,
                "usedConversations": current.used_conversations,
                "message": "You have reached your conversation limit. Please renew your subscription.",
            });
            return Ok((StatusCode::FORBIDDEN, Json(body)).into_response());
        }

        let used = user::increment_used_conversations(pool, user_id, now).await?;
        info!(user_id = %user_id, used, "Consultation turn consumed");

        history = conversation::history_for_context(
            pool,
            user_id,
            state.brain.config().max_history_turns,
        )
        .await?
        .into_iter()
        .map(|turn| (turn.role, turn.content))
        .collect();

        profile = Some(SeekerProfile {
            name: current.name.clone(),
            gender: current.gender.clone(),
            birth_date: current.birth_date.map(|d| d.date_naive()),
            birth_time: current.birth_time.clone(),
            birth_place: current.birth_place.clone(),
        });

        let on_topic = prompt::is_on_topic(&req.question);
        conversation::create_conversation(
            pool,
            &conversation::NewConversation {
                user_id: user_id.clone(),
                role: "user".to_string(),
                content: req.question.clone(),
                is_on_topic: on_topic,
            },
            now,
        )
        .await?;
    }

    let messages = prompt::chat_messages(profile.as_ref(), &history, &req.question);

    // Upstream errors surface as a plain error response; the SSE stream
    // only begins once the upstream has accepted the request.
    let stream = state.brain.chat_stream(messages).await?;

    let persist = req
        .user_id
        .as_ref()
        .map(|user_id| (state.db.clone(), user_id.clone()));

    Ok(relay_sse(stream, persist).into_response())
}

/// Relay an upstream stream to the client as SSE.
///
/// The spawned task owns the upstream stream: when the client goes away
/// the channel send fails, the task returns, and dropping the stream
/// tears down the upstream request. Persisting the assistant turn is the
/// task's final step before the `[DONE]` sentinel, and only happens on a
/// cleanly completed stream.
pub(crate) fn relay_sse(
    mut stream: ChatStream,
    persist: Option<(database::Database, String)>,
) -> Sse<ReceiverStream<std::result::Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        let mut full_response = String::new();

        loop {
            match stream.next_delta().await {
                Ok(Some(fragment)) => {
                    full_response.push_str(&fragment);
                    let payload = serde_json::json!({ "content": fragment }).to_string();
                    if tx.send(Ok(Event::default().data(payload))).await.is_err() {
                        info!("Client disconnected, cancelling upstream stream");
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Upstream stream failed mid-answer: {}", e);
                    return;
                }
            }
        }

        if !stream.completed() {
            warn!("Upstream stream truncated, withholding [DONE]");
            return;
        }

        if let Some((db, user_id)) = persist {
            if full_response.is_empty() {
                warn!(user_id = %user_id, "Completed stream carried no content");
            } else if let Err(e) = conversation::create_conversation(
                db.pool(),
                &conversation::NewConversation {
                    user_id,
                    role: "assistant".to_string(),
                    content: full_response,
                    is_on_topic: true,
                },
                Utc::now(),
            )
            .await
            {
                error!("Failed to save assistant turn: {}", e);
            }
        }

        let _ = tx.send(Ok(Event::default().data("[DONE]"))).await;
    });

    Sse::new(ReceiverStream::new(rx))
}
