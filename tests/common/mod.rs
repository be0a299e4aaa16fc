// Each integration test file is a separate binary; helpers not used in every
// binary would otherwise trigger dead_code warnings from clippy.
#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    routing::{delete, get, post},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use companion_server::{
    db, handlers,
    state::AppState,
    websocket::{websocket_handler, Hub},
};

pub const TEST_SESSION_SECRET: &str = "test-secret-min-32-characters-long!!";

/// Fresh application state over a migrated in-memory database.
///
/// The pool is pinned to a single connection — each in-memory SQLite
/// connection is its own database.
pub async fn test_state() -> AppState {
    let pool = db::create_pool("sqlite::memory:")
        .await
        .expect("Failed to create in-memory pool");
    db::migrate(&pool).await.expect("Failed to migrate");
    AppState {
        pool,
        session_secret: Arc::from(TEST_SESSION_SECRET),
        hub: Hub::spawn(),
    }
}

/// Build the full application router wired to the given state.
pub fn create_test_app(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health_check))
        .route("/api/auth/register", post(handlers::auth::register))
        .route("/api/auth/login", post(handlers::auth::login))
        // Conversation routes
        .route(
            "/api/conversations",
            get(handlers::conversations::list_conversations),
        )
        .route(
            "/api/conversations",
            post(handlers::conversations::create_conversation),
        )
        .route(
            "/api/conversations/:id/messages",
            get(handlers::conversations::list_messages),
        )
        // Event routes
        .route("/api/events", post(handlers::events::create_event))
        // Join-request routes
        .route(
            "/api/events/:id/chat/requests",
            post(handlers::join_requests::request_join),
        )
        .route(
            "/api/events/:id/chat/requests/:user_id/approve",
            post(handlers::join_requests::approve_join),
        )
        .route(
            "/api/events/:id/chat/requests/:user_id/deny",
            post(handlers::join_requests::deny_join),
        )
        .route(
            "/api/events/:id/chat/members/:user_id",
            delete(handlers::join_requests::remove_member),
        )
        // WebSocket gateway
        .route("/api/ws", get(websocket_handler))
        .with_state(state)
}

/// State + router pair for tests that don't need direct hub or pool access.
pub async fn test_app() -> Router {
    create_test_app(test_state().await)
}

/// Generate an email that is unique per test invocation.
pub fn unique_email(name: &str) -> String {
    format!("{name}-{}@example.com", &uuid::Uuid::new_v4().simple().to_string()[..12])
}

// ── Request helpers ──────────────────────────────────────────────────────────

pub async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, req).await
}

pub async fn post_json_authed(
    app: Router,
    uri: &str,
    token: &str,
    body: Value,
) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, req).await
}

/// POST with no request body (the join-request and decision routes).
pub async fn post_authed(app: Router, uri: &str, token: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    send(app, req).await
}

pub async fn get_authed(app: Router, uri: &str, token: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    send(app, req).await
}

pub async fn delete_authed(app: Router, uri: &str, token: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    send(app, req).await
}

pub async fn get_no_auth(app: Router, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, req).await
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

// ── Scenario helpers ─────────────────────────────────────────────────────────

/// Register a fresh user and return the full response body (`user` + `token`).
pub async fn register_user(app: Router, name: &str) -> Value {
    let (status, body) = post_json(
        app,
        "/api/auth/register",
        serde_json::json!({
            "name": name,
            "email": unique_email(name),
            "password": "pass1234!",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "setup register failed: {body}");
    body
}

/// Register a user and return `(token, user_id)`.
pub async fn register_and_get_token(app: Router, name: &str) -> (String, i64) {
    let body = register_user(app, name).await;
    (
        body["token"].as_str().unwrap().to_owned(),
        body["user"]["id"].as_i64().unwrap(),
    )
}

/// Create a conversation and return the full response body.
pub async fn create_conversation(
    app: Router,
    token: &str,
    title: &str,
    member_ids: &[i64],
) -> Value {
    let (status, body) = post_json_authed(
        app,
        "/api/conversations",
        token,
        serde_json::json!({ "title": title, "member_ids": member_ids }),
    )
    .await;
    assert_eq!(
        status,
        StatusCode::CREATED,
        "setup create_conversation failed: {body}"
    );
    body
}

/// Publish an event and return the full response body (`event` + `conversation`).
pub async fn create_event(app: Router, token: &str, title: &str) -> Value {
    let (status, body) = post_json_authed(
        app,
        "/api/events",
        token,
        serde_json::json!({
            "title": title,
            "location": "Riverside park",
            "time": "19:00",
            "date_label": "Today",
            "min_age": 18,
            "max_age": 99,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "setup create_event failed: {body}");
    body
}

/// Insert a message through the store, as the WebSocket send path would.
pub async fn persist_message(
    state: &AppState,
    conversation_id: i64,
    sender_id: i64,
    body: &str,
) -> companion_server::models::Message {
    companion_server::store::messages::create_message(
        &state.pool,
        companion_server::models::NewMessage {
            conversation_id,
            sender_id,
            body: body.to_string(),
            attachment_url: None,
            delivery_status: "sent".to_string(),
        },
    )
    .await
    .expect("setup persist_message failed")
}
