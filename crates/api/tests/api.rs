//! End-to-end tests against the full router, in-memory database, and
//! sandbox providers.

use api::config::Config;
use api::payment::Gateways;
use api::routes;
use api::routes::payment::sandbox_success_params;
use api::session;
use api::sms::SandboxSms;
use api::state::AppState;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chrono::{Duration, Utc};
use database::{activation_list, conversation, user, Database};
use deepseek_brain::{DeepSeekBrain, DeepSeekConfig};
use serde_json::{json, Value};
use tower::ServiceExt;

const SECRET: &str = "test-secret";
const ADMIN_PASSWORD: &str = "admin-pass";

fn test_config() -> Config {
    Config {
        addr: "127.0.0.1:0".parse().unwrap(),
        database_url: "sqlite::memory:".to_string(),
        session_secret: SECRET.to_string(),
        admin_password: ADMIN_PASSWORD.to_string(),
        base_url: "http://localhost:5000".to_string(),
        show_verification_code: true,
        sms: None,
        alipay: None,
        wechat: None,
    }
}

async fn test_state_with_upstream(upstream: Option<String>) -> AppState {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    db.migrate().await.unwrap();

    let brain_config = DeepSeekConfig {
        // Unroutable unless a test provides a live upstream.
        api_url: upstream.unwrap_or_else(|| "http://127.0.0.1:1".to_string()),
        api_key: "test-key".to_string(),
        ..DeepSeekConfig::default()
    };
    let brain = DeepSeekBrain::new(brain_config).unwrap();

    let config = test_config();
    let gateways = Gateways::from_config(&config);
    AppState::new(db, brain, Box::new(SandboxSms), gateways, config)
}

async fn test_state() -> AppState {
    test_state_with_upstream(None).await
}

fn user_cookie(user_id: &str) -> String {
    let value = session::sign(user_id, Utc::now() + Duration::days(7), SECRET);
    format!("user_id={}", value)
}

fn admin_cookie() -> String {
    let value = session::sign("admin", Utc::now() + Duration::hours(24), SECRET);
    format!("admin_token={}", value)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn json_request_with_cookie(method: &str, uri: &str, body: Value, cookie: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::COOKIE, cookie)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let app = routes::router(test_state().await);
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn send_code_creates_placeholder_and_echoes_code_in_debug_mode() {
    let state = test_state().await;
    let app = routes::router(state.clone());

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/auth/send-code",
            json!({ "phoneNumber": "13800138000" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    let code = body["code"].as_str().unwrap();
    assert_eq!(code.len(), 6);

    let created = user::get_user_by_phone(state.db.pool(), "13800138000")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(created.verification_code.as_deref(), Some(code));
}

#[tokio::test]
async fn send_code_rejects_malformed_phone() {
    let app = routes::router(test_state().await);
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/auth/send-code",
            json!({ "phoneNumber": "12345" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn login_reports_unactivated_account_and_sets_signed_cookie() {
    let state = test_state().await;
    let now = Utc::now();
    user::create_placeholder(state.db.pool(), "13800138000", now)
        .await
        .unwrap();
    user::save_verification_code(state.db.pool(), "13800138000", "123456", 300, now)
        .await
        .unwrap();

    let app = routes::router(state.clone());
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/auth/login",
            json!({ "phoneNumber": "13800138000", "code": "123456" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(set_cookie.starts_with("user_id="));
    // Signed value, not a bare user id.
    assert!(set_cookie.contains('.'));

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["user"]["isActivated"], false);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("not activated"));

    // The code is single-use.
    let current = user::get_user_by_phone(state.db.pool(), "13800138000")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.verification_code, None);
}

#[tokio::test]
async fn login_rejects_wrong_code() {
    let state = test_state().await;
    let now = Utc::now();
    user::create_placeholder(state.db.pool(), "13800138000", now)
        .await
        .unwrap();
    user::save_verification_code(state.db.pool(), "13800138000", "123456", 300, now)
        .await
        .unwrap();

    let app = routes::router(state);
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/auth/login",
            json!({ "phoneNumber": "13800138000", "code": "999999" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_auto_activates_allow_listed_phone() {
    let state = test_state().await;
    let now = Utc::now();
    activation_list::add_entry(state.db.pool(), "13900139000", "admin", None, now)
        .await
        .unwrap();
    user::create_placeholder(state.db.pool(), "13900139000", now)
        .await
        .unwrap();
    user::save_verification_code(state.db.pool(), "13900139000", "552210", 300, now)
        .await
        .unwrap();

    let app = routes::router(state.clone());
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/auth/login",
            json!({ "phoneNumber": "13900139000", "code": "552210" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["user"]["isActivated"], true);
    assert_eq!(body["user"]["maxConversations"], 100);
    assert_eq!(body["user"]["remainingConversations"], 100);
}

#[tokio::test]
async fn guarded_route_rejects_missing_and_unsigned_cookies() {
    let state = test_state().await;

    // No cookie at all
    let response = routes::router(state.clone())
        .oneshot(
            Request::get("/api/user/profile?userId=x")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // A bare id, the shape a pre-signing client would send
    let response = routes::router(state)
        .oneshot(
            Request::get("/api/user/profile?userId=x")
                .header(header::COOKIE, "user_id=some-user-id")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn session_subject_must_match_the_requested_user() {
    let state = test_state().await;
    let now = Utc::now();
    let alice = user::create_placeholder(state.db.pool(), "13800138000", now)
        .await
        .unwrap();
    let bob = user::create_placeholder(state.db.pool(), "13900139000", now)
        .await
        .unwrap();
    conversation::create_conversation(
        state.db.pool(),
        &conversation::NewConversation {
            user_id: bob.id.clone(),
            role: "user".to_string(),
            content: "秘密".to_string(),
            is_on_topic: true,
        },
        now,
    )
    .await
    .unwrap();

    // Alice's cookie cannot read or wipe Bob's history.
    let response = routes::router(state.clone())
        .oneshot(
            Request::get(format!("/api/user/conversations?userId={}", bob.id))
                .header(header::COOKIE, user_cookie(&alice.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = routes::router(state.clone())
        .oneshot(
            Request::delete(format!("/api/user/conversations?userId={}", bob.id))
                .header(header::COOKIE, user_cookie(&alice.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let remaining = conversation::history_for_context(state.db.pool(), &bob.id, 10)
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);

    // Nor update Bob's profile or order on his behalf.
    let response = routes::router(state.clone())
        .oneshot(json_request_with_cookie(
            "PUT",
            "/api/user/profile",
            json!({ "userId": bob.id, "name": "冒充" }),
            &user_cookie(&alice.id),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = routes::router(state)
        .oneshot(json_request_with_cookie(
            "POST",
            "/api/payment/order",
            json!({ "userId": bob.id, "planId": "weekly", "paymentMethod": "alipay" }),
            &user_cookie(&alice.id),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn mock_pay_page_escapes_reflected_input() {
    let state = test_state().await;

    let response = routes::router(state.clone())
        .oneshot(
            Request::get("/api/payment/mock?orderId=%3Cscript%3Ealert(1)%3C/script%3E&method=alipay")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(!html.contains("<script>"));
    assert!(html.contains("&lt;script&gt;"));

    // Unknown methods never reach the page.
    let response = routes::router(state)
        .oneshot(
            Request::get("/api/payment/mock?orderId=TJG123&method=%3Cb%3E")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn profile_update_reports_need_payment_for_ordinary_user() {
    let state = test_state().await;
    let now = Utc::now();
    let created = user::create_placeholder(state.db.pool(), "13800138000", now)
        .await
        .unwrap();

    let app = routes::router(state);
    let response = app
        .oneshot(json_request_with_cookie(
            "PUT",
            "/api/user/profile",
            json!({
                "userId": created.id,
                "name": "张三",
                "gender": "male",
                "birthDate": "1990-05-12",
                "birthTime": "chen",
                "birthPlace": "北京",
                "initialQuestion": "今年财运如何",
            }),
            &user_cookie(&created.id),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["needPayment"], true);
    assert_eq!(body["user"]["hasCompleteFortuneInfo"], true);
    assert_eq!(body["user"]["isActivated"], false);
}

#[tokio::test]
async fn profile_update_auto_activates_allow_listed_user() {
    let state = test_state().await;
    let now = Utc::now();
    activation_list::add_entry(state.db.pool(), "13900139000", "admin", None, now)
        .await
        .unwrap();
    let created = user::create_placeholder(state.db.pool(), "13900139000", now)
        .await
        .unwrap();

    let app = routes::router(state);
    let response = app
        .oneshot(json_request_with_cookie(
            "PUT",
            "/api/user/profile",
            json!({ "userId": created.id, "name": "李四" }),
            &user_cookie(&created.id),
        ))
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["needPayment"], false);
    assert_eq!(body["user"]["isActivated"], true);
    assert_eq!(body["user"]["maxConversations"], 100);
}

#[tokio::test]
async fn profile_get_reports_allow_list_membership() {
    let state = test_state().await;
    let now = Utc::now();
    activation_list::add_entry(state.db.pool(), "13900139000", "admin", None, now)
        .await
        .unwrap();
    let created = user::create_placeholder(state.db.pool(), "13900139000", now)
        .await
        .unwrap();

    let app = routes::router(state);
    let response = app
        .oneshot(
            Request::get(format!("/api/user/profile?userId={}", created.id))
                .header(header::COOKIE, user_cookie(&created.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["isInActivationList"], true);
}

#[tokio::test]
async fn conversations_delete_reports_count() {
    let state = test_state().await;
    let now = Utc::now();
    let created = user::create_placeholder(state.db.pool(), "13800138000", now)
        .await
        .unwrap();
    for (role, content) in [("user", "问题"), ("assistant", "回答")] {
        conversation::create_conversation(
            state.db.pool(),
            &conversation::NewConversation {
                user_id: created.id.clone(),
                role: role.to_string(),
                content: content.to_string(),
                is_on_topic: true,
            },
            now,
        )
        .await
        .unwrap();
    }

    let app = routes::router(state);
    let response = app
        .oneshot(
            Request::delete(format!("/api/user/conversations?userId={}", created.id))
                .header(header::COOKIE, user_cookie(&created.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["deletedCount"], 2);
}

#[tokio::test]
async fn admin_login_round_trip() {
    let state = test_state().await;

    let response = routes::router(state.clone())
        .oneshot(json_request(
            "POST",
            "/api/admin/login",
            json!({ "password": "wrong" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = routes::router(state)
        .oneshot(json_request(
            "POST",
            "/api/admin/login",
            json!({ "password": ADMIN_PASSWORD }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(set_cookie.starts_with("admin_token="));
}

#[tokio::test]
async fn admin_users_requires_admin_cookie() {
    let state = test_state().await;

    // A valid *user* cookie must not open the admin panel.
    let created = user::create_placeholder(state.db.pool(), "13800138000", Utc::now())
        .await
        .unwrap();
    let response = routes::router(state.clone())
        .oneshot(
            Request::get("/api/admin/users")
                .header(header::COOKIE, user_cookie(&created.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = routes::router(state)
        .oneshot(
            Request::get("/api/admin/users")
                .header(header::COOKIE, admin_cookie())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_list_includes_computed_flags() {
    let state = test_state().await;
    let now = Utc::now();
    let created = user::create_placeholder(state.db.pool(), "13800138000", now)
        .await
        .unwrap();
    user::activate_user(state.db.pool(), &created.id, 7, 100, now)
        .await
        .unwrap();

    let app = routes::router(state);
    let response = app
        .oneshot(
            Request::get("/api/admin/users")
                .header(header::COOKIE, admin_cookie())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let body = body_json(response).await;
    let row = &body["users"][0];
    assert_eq!(row["isActivated"], true);
    assert_eq!(row["isExpired"], false);
    assert_eq!(row["isLimitExceeded"], false);
    assert_eq!(row["remainingConversations"], 100);
}

#[tokio::test]
async fn admin_activation_grants_entitlement() {
    let state = test_state().await;
    let created = user::create_placeholder(state.db.pool(), "13800138000", Utc::now())
        .await
        .unwrap();

    let app = routes::router(state.clone());
    let response = app
        .oneshot(json_request_with_cookie(
            "POST",
            "/api/admin/users",
            json!({ "userId": created.id, "validDays": 30, "maxConversations": 200 }),
            &admin_cookie(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["user"]["isActivated"], true);
    assert_eq!(body["user"]["maxConversations"], 200);
}

#[tokio::test]
async fn order_and_sandbox_callback_settle_idempotently() {
    let state = test_state().await;
    let now = Utc::now();
    let created = user::create_placeholder(state.db.pool(), "13800138000", now)
        .await
        .unwrap();

    // Create an order for the weekly plan.
    let response = routes::router(state.clone())
        .oneshot(json_request_with_cookie(
            "POST",
            "/api/payment/order",
            json!({
                "userId": created.id,
                "planId": "weekly",
                "paymentMethod": "alipay",
                "name": "张三",
                "gender": "male",
            }),
            &user_cookie(&created.id),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let order_id = body["order"]["orderId"].as_str().unwrap().to_string();
    assert!(order_id.starts_with("TJG"));
    assert_eq!(body["order"]["amountCents"], 1990);
    assert!(body["paymentUrl"]
        .as_str()
        .unwrap()
        .contains("/api/payment/mock"));

    // Profile fields riding on the order were saved.
    let refreshed = user::get_user(state.db.pool(), &created.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refreshed.name, "张三");

    // First success callback settles and activates.
    let params = sandbox_success_params(&order_id);
    let response = routes::router(state.clone())
        .oneshot(json_request(
            "POST",
            "/api/payment/callback/alipay",
            serde_json::to_value(&params).unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["activated"], true);

    let activated = user::get_user(state.db.pool(), &created.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(activated.max_conversations, 100);
    assert!(activated.expires_at.is_some());

    // Replaying the callback acknowledges without re-granting.
    let response = routes::router(state)
        .oneshot(json_request(
            "POST",
            "/api/payment/callback/alipay",
            serde_json::to_value(&params).unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["alreadyPaid"], true);
}

#[tokio::test]
async fn callback_with_tampered_signature_is_rejected() {
    let state = test_state().await;
    let mut params = sandbox_success_params("TJG-FAKE");
    params.insert("order_id".to_string(), "TJG-OTHER".to_string());

    let response = routes::router(state)
        .oneshot(json_request(
            "POST",
            "/api/payment/callback/wechat",
            serde_json::to_value(&params).unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn order_rejects_unknown_plan_and_method() {
    let state = test_state().await;
    let created = user::create_placeholder(state.db.pool(), "13800138000", Utc::now())
        .await
        .unwrap();

    let response = routes::router(state.clone())
        .oneshot(json_request_with_cookie(
            "POST",
            "/api/payment/order",
            json!({ "userId": created.id, "planId": "monthly", "paymentMethod": "alipay" }),
            &user_cookie(&created.id),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = routes::router(state)
        .oneshot(json_request_with_cookie(
            "POST",
            "/api/payment/order",
            json!({ "userId": created.id, "planId": "weekly", "paymentMethod": "cash" }),
            &user_cookie(&created.id),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// --- chat relay ---

async fn spawn_upstream(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn fake_upstream() -> Router {
    use axum::routing::post;
    Router::new().route(
        "/chat/completions",
        post(|| async {
            (
                [(header::CONTENT_TYPE, "text/event-stream")],
                "data: {\"choices\":[{\"delta\":{\"content\":\"【财运分析】\"}}]}\n\n\
                 data: {\"choices\":[{\"delta\":{\"content\":\"整体平稳。\"}}]}\n\n\
                 data: [DONE]\n\n",
            )
        }),
    )
}

async fn activated_user(state: &AppState) -> database::User {
    let now = Utc::now();
    let created = user::create_placeholder(state.db.pool(), "13800138000", now)
        .await
        .unwrap();
    user::activate_user(state.db.pool(), &created.id, 7, 100, now)
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn chat_relays_frames_and_persists_both_turns() {
    let upstream = spawn_upstream(fake_upstream()).await;
    let state = test_state_with_upstream(Some(upstream)).await;
    let current = activated_user(&state).await;

    let response = routes::router(state.clone())
        .oneshot(json_request(
            "POST",
            "/api/fortune/chat",
            json!({ "question": "今年财运如何", "userId": current.id }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );

    let text = body_text(response).await;
    assert!(text.contains("data: {\"content\":\"【财运分析】\"}"));
    assert!(text.contains("data: {\"content\":\"整体平稳。\"}"));
    assert!(text.trim_end().ends_with("data: [DONE]"));

    // Both turns are on record once the stream has drained.
    let history = conversation::history_for_context(state.db.pool(), &current.id, 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, "user");
    assert_eq!(history[0].content, "今年财运如何");
    assert_eq!(history[1].role, "assistant");
    assert_eq!(history[1].content, "【财运分析】整体平稳。");

    // The turn was paid for.
    let after = user::get_user(state.db.pool(), &current.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.used_conversations, 1);
}

#[tokio::test]
async fn chat_without_account_streams_but_persists_nothing() {
    let upstream = spawn_upstream(fake_upstream()).await;
    let state = test_state_with_upstream(Some(upstream)).await;

    let response = routes::router(state)
        .oneshot(json_request(
            "POST",
            "/api/fortune/chat",
            json!({ "question": "占卜一下" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await;
    assert!(text.trim_end().ends_with("data: [DONE]"));
}

#[tokio::test]
async fn chat_rejects_unactivated_user_before_upstream() {
    // No upstream at all: the entitlement gate must fire first.
    let state = test_state().await;
    let created = user::create_placeholder(state.db.pool(), "13800138000", Utc::now())
        .await
        .unwrap();

    let response = routes::router(state.clone())
        .oneshot(json_request(
            "POST",
            "/api/fortune/chat",
            json!({ "question": "今年财运如何", "userId": created.id }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // The rejected turn costs nothing.
    let after = user::get_user(state.db.pool(), &created.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.used_conversations, 0);
}

#[tokio::test]
async fn chat_rejects_expired_user_even_with_quota_left() {
    // No upstream: the expiry gate must fire before any request goes out.
    let state = test_state().await;
    let now = Utc::now();
    let created = user::create_placeholder(state.db.pool(), "13800138000", now)
        .await
        .unwrap();
    // An entitlement whose window closed yesterday, quota untouched.
    user::activate_user(state.db.pool(), &created.id, -1, 100, now)
        .await
        .unwrap();

    let response = routes::router(state.clone())
        .oneshot(json_request(
            "POST",
            "/api/fortune/chat",
            json!({ "question": "今年财运如何", "userId": created.id }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("expired"));

    let after = user::get_user(state.db.pool(), &created.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.used_conversations, 0);
}

#[tokio::test]
async fn chat_rejects_exhausted_quota_with_counts() {
    let state = test_state().await;
    let now = Utc::now();
    let created = user::create_placeholder(state.db.pool(), "13800138000", now)
        .await
        .unwrap();
    user::activate_user(state.db.pool(), &created.id, 7, 2, now)
        .await
        .unwrap();
    for _ in 0..2 {
        user::increment_used_conversations(state.db.pool(), &created.id, now)
            .await
            .unwrap();
    }

    let response = routes::router(state)
        .oneshot(json_request(
            "POST",
            "/api/fortune/chat",
            json!({ "question": "今年财运如何", "userId": created.id }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = body_json(response).await;
    assert_eq!(body["error"], "Conversation limit exceeded");
    assert_eq!(body["maxConversations"], 2);
    assert_eq!(body["usedConversations"], 2);
}

#[tokio::test]
async fn chat_rejects_empty_question() {
    let state = test_state().await;
    let response = routes::router(state)
        .oneshot(json_request("POST", "/api/fortune/chat", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn analyze_streams_without_an_account() {
    let upstream = spawn_upstream(fake_upstream()).await;
    let state = test_state_with_upstream(Some(upstream)).await;

    let response = routes::router(state)
        .oneshot(json_request(
            "POST",
            "/api/fortune/analyze",
            json!({
                "name": "张三",
                "gender": "male",
                "birthDate": "1990-05-12",
                "birthTime": "chen",
                "birthPlace": "北京",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await;
    assert!(text.contains("data: {\"content\":"));
    assert!(text.trim_end().ends_with("data: [DONE]"));
}

#[tokio::test]
async fn analyze_rejects_missing_fields() {
    let state = test_state().await;
    let response = routes::router(state)
        .oneshot(json_request(
            "POST",
            "/api/fortune/analyze",
            json!({ "name": "张三" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
