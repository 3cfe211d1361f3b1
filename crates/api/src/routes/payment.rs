//! Payment order creation and vendor callbacks.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::response::{Html, IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use database::order::{self, NewOrder, SettleOutcome};
use database::{entitlement, user, Order};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{ApiError, Result};
use crate::payment::{self, PaymentError};
use crate::routes::profile::parse_birth_date_utc;
use crate::routes::require_self;
use crate::session::SessionUser;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub user_id: Option<String>,
    pub plan_id: Option<String>,
    pub payment_method: Option<String>,
    pub name: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<String>,
    pub birth_time: Option<String>,
    pub birth_place: Option<String>,
}

fn order_payload(order: &Order) -> serde_json::Value {
    serde_json::json!({
        "orderId": order.id,
        "userId": order.user_id,
        "planId": order.plan_id,
        "amountCents": order.amount_cents,
        "paymentMethod": order.payment_method,
        "status": order.status,
        "createdAt": order.created_at,
        "paidAt": order.paid_at,
    })
}

/// `POST /api/payment/order` — create a pending order and hand back the
/// gateway pay URL.
///
/// The price, validity, and quota come from the server-side plan table,
/// never from the client. Profile fields riding along on the request are
/// saved first when the account is unactivated or expired, so the
/// reading can start right after payment.
pub async fn create_order(
    State(state): State<AppState>,
    Extension(session): Extension<SessionUser>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<Response> {
    let user_id = req
        .user_id
        .ok_or_else(|| ApiError::BadRequest("Missing required parameters".to_string()))?;
    require_self(&session, &user_id)?;
    let plan_id = req
        .plan_id
        .ok_or_else(|| ApiError::BadRequest("Missing required parameters".to_string()))?;
    let payment_method = req
        .payment_method
        .ok_or_else(|| ApiError::BadRequest("Missing required parameters".to_string()))?;

    let plan = payment::plan(&plan_id)
        .ok_or_else(|| ApiError::BadRequest(format!("Unknown plan: {}", plan_id)))?;
    let gateway = state
        .gateways
        .for_method(&payment_method)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let now = Utc::now();
    let pool = state.db.pool();

    let current = user::get_user(pool, &user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    if !current.is_active {
        return Err(ApiError::Forbidden("Account is disabled".to_string()));
    }

    if !entitlement::is_activated(&current) || entitlement::is_expired(&current, now) {
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
            ..Default::default()
        };
        if !update.is_empty() {
            user::update_user(pool, &user_id, &update, now).await?;
        }
    }

    let order_id = payment::new_order_number(now);
    let created = order::create_order(
        pool,
        &NewOrder {
            id: order_id.clone(),
            user_id,
            plan_id,
            amount_cents: plan.amount_cents,
            payment_method: payment_method.clone(),
        },
        now,
    )
    .await?;

    let pay_url = gateway.pay_url(&payment_method, &order_id, plan, &state.config.base_url);
    info!(order_id = %order_id, method = %payment_method, amount_cents = plan.amount_cents, "Order created");

    Ok(Json(serde_json::json!({
        "success": true,
        "order": order_payload(&created),
        "paymentUrl": pay_url,
        "message": "订单创建成功",
    }))
    .into_response())
}

/// `POST /api/payment/callback/:method` — verified vendor notification.
///
/// Settlement is keyed by order id and idempotent: replaying a success
/// callback acknowledges without granting the entitlement twice.
pub async fn callback(
    State(state): State<AppState>,
    Path(method): Path<String>,
    Json(params): Json<HashMap<String, String>>,
) -> Result<Response> {
    let gateway = state
        .gateways
        .for_method(&method)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let notice = gateway.verify_callback(&params).map_err(|e| match e {
        PaymentError::BadSignature => {
            warn!(method = %method, "Rejected callback with bad signature");
            ApiError::Unauthorized("Invalid callback signature".to_string())
        }
        other => ApiError::BadRequest(other.to_string()),
    })?;

    let now = Utc::now();
    let pool = state.db.pool();

    let existing = order::get_order(pool, &notice.order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Order not found".to_string()))?;

    if !notice.succeeded {
        let failed = order::mark_failed(pool, &existing.id).await?;
        warn!(order_id = %failed.id, "Payment failed");
        return Ok(Json(serde_json::json!({
            "success": false,
            "order": order_payload(&failed),
        }))
        .into_response());
    }

    let plan = payment::plan(&existing.plan_id).ok_or_else(|| {
        ApiError::Internal(format!("Order {} references unknown plan", existing.id))
    })?;

    let outcome = order::settle_paid_order(
        pool,
        &existing.id,
        plan.valid_days,
        plan.max_conversations,
        now,
    )
    .await?;

    let body = match outcome {
        SettleOutcome::Activated { order, user } => {
            info!(order_id = %order.id, user_id = %user.id, "Order settled, user activated");
            serde_json::json!({
                "success": true,
                "order": order_payload(&order),
                "activated": true,
                "expiresAt": user.expires_at,
            })
        }
        SettleOutcome::AlreadyPaid(order) => {
            info!(order_id = %order.id, "Duplicate success callback acknowledged");
            serde_json::json!({
                "success": true,
                "order": order_payload(&order),
                "alreadyPaid": true,
            })
        }
    };

    Ok(Json(body).into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockPayQuery {
    pub order_id: Option<String>,
    pub method: Option<String>,
}

/// `GET /api/payment/mock` — sandbox payment page. Renders a minimal
/// confirmation with a signed success-callback payload the operator (or
/// a test) can POST to the callback endpoint.
///
/// Both query values are reflected into the page: the method must name a
/// configured gateway and the order id is HTML-escaped.
pub async fn mock_pay(
    State(state): State<AppState>,
    Query(query): Query<MockPayQuery>,
) -> Result<Response> {
    let order_id = query
        .order_id
        .ok_or_else(|| ApiError::BadRequest("Missing required parameters".to_string()))?;
    let method = query
        .method
        .ok_or_else(|| ApiError::BadRequest("Missing required parameters".to_string()))?;
    state
        .gateways
        .for_method(&method)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let params = sandbox_success_params(&order_id);
    let payload = serde_json::to_string(&params)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let html = format!(
        "<!DOCTYPE html><html lang=\"zh-CN\"><head><meta charset=\"UTF-8\">\
         <title>模拟支付</title></head><body>\
         <h1>模拟支付</h1>\
         <p>订单号：{}</p><p>支付方式：{}</p>\
         <p>确认支付后，将以下内容 POST 到 /api/payment/callback/{}：</p>\
         <pre>{}</pre>\
         </body></html>",
        html_escape(&order_id),
        method,
        method,
        html_escape(&payload)
    );
    Ok(Html(html).into_response())
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Signed sandbox success-callback parameters for an order.
pub fn sandbox_success_params(order_id: &str) -> HashMap<String, String> {
    let mut params = HashMap::from([
        ("order_id".to_string(), order_id.to_string()),
        ("trade_status".to_string(), "SUCCESS".to_string()),
    ]);
    let sign = payment::sign_params(&params, payment::Gateway::SANDBOX_SECRET);
    params.insert("sign".to_string(), sign);
    params
}
