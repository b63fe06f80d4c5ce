use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use sayit_api::routes::router;
use sayit_api::state::AppStateInner;
use sayit_core::{ChatConfig, ChatService};
use sayit_db::Database;
use sayit_types::api::Claims;

const SECRET: &str = "test-secret-for-routes";

struct TestApp {
    _dir: TempDir,
    router: Router,
}

fn app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::open(&dir.path().join("api.db")).unwrap());
    let chat = ChatService::new(db, ChatConfig::default());
    TestApp {
        _dir: dir,
        router: router(AppStateInner::new(chat, SECRET.into())),
    }
}

fn token(user_id: Uuid) -> String {
    let exp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
        + 3600;
    encode(
        &Header::default(),
        &Claims {
            sub: user_id,
            exp: exp as usize,
        },
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

async fn call(app: &TestApp, method: &str, uri: &str, user: Option<Uuid>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token(user)));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_is_public() {
    let app = app();
    let (status, body) = call(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn protected_routes_need_a_valid_token() {
    let app = app();
    let (status, body) = call(&app, "GET", "/conversations", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "UNAUTHORIZED");

    let request = Request::builder()
        .uri("/conversations")
        .header(header::AUTHORIZATION, "Bearer garbage")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn conversation_round_trip() {
    let app = app();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let (status, conversation) = call(&app, "POST", "/conversations", Some(a), Some(json!({ "participant_ids": [b] }))).await;
    assert_eq!(status, StatusCode::OK);
    let id = conversation["id"].as_str().unwrap().to_string();

    let (_, again) = call(&app, "POST", "/conversations", Some(b), Some(json!({ "participant_ids": [a] }))).await;
    assert_eq!(again["id"], conversation["id"]);

    for text in ["hi", "  how are you?  "] {
        let (status, _) = call(
            &app,
            "POST",
            &format!("/conversations/{}/messages", id),
            Some(a),
            Some(json!({ "text": text })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, messages) = call(&app, "GET", &format!("/conversations/{}/messages?after=1", id), Some(b), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(messages.as_array().unwrap().len(), 1);
    assert_eq!(messages[0]["sequence"], 2);
    assert_eq!(messages[0]["text"], "how are you?");
    assert_eq!(messages[0]["status"], "sent");

    let (_, listed) = call(&app, "GET", "/conversations", Some(b), None).await;
    assert_eq!(listed[0]["unread_counts"][b.to_string()], 2);

    let (status, _) = call(
        &app,
        "POST",
        &format!("/conversations/{}/read", id),
        Some(b),
        Some(json!({ "upto_sequence": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, listed) = call(&app, "GET", "/conversations", Some(b), None).await;
    assert_eq!(listed[0]["unread_counts"][b.to_string()], 0);
    let (_, messages) = call(&app, "GET", &format!("/conversations/{}/messages", id), Some(a), None).await;
    assert!(messages.as_array().unwrap().iter().all(|m| m["status"] == "read"));
}

#[tokio::test]
async fn validation_errors_map_to_statuses() {
    let app = app();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let (_, conversation) = call(&app, "POST", "/conversations", Some(a), Some(json!({ "participant_ids": [b] }))).await;
    let id = conversation["id"].as_str().unwrap().to_string();

    let (status, body) = call(
        &app,
        "POST",
        &format!("/conversations/{}/messages", id),
        Some(a),
        Some(json!({ "text": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "EMPTY_MESSAGE");

    let (status, body) = call(
        &app,
        "POST",
        &format!("/conversations/{}/messages", Uuid::new_v4()),
        Some(a),
        Some(json!({ "text": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "INVALID_CONVERSATION");

    let (status, _) = call(&app, "GET", &format!("/conversations/{}/messages", id), Some(Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(&app, "POST", "/conversations", Some(a), Some(json!({ "participant_ids": [a] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_PARTICIPANTS");
}

#[tokio::test]
async fn typing_endpoints_accept_and_clear() {
    let app = app();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let (_, conversation) = call(&app, "POST", "/conversations", Some(a), Some(json!({ "participant_ids": [b] }))).await;
    let id = conversation["id"].as_str().unwrap().to_string();
    let uri = format!("/conversations/{}/typing", id);

    let (status, _) = call(&app, "POST", &uri, Some(a), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&app, "DELETE", &uri, Some(a), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&app, "POST", &format!("/conversations/{}/typing", Uuid::new_v4()), Some(a), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn profiles_can_be_updated_and_read_by_others() {
    let app = app();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let (status, body) = call(&app, "GET", "/users/me", Some(a), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NOT_FOUND");

    let (status, profile) = call(
        &app,
        "PUT",
        "/users/me",
        Some(a),
        Some(json!({ "display_name": "Ada", "avatar_url": "https://cdn.example.com/ada.png" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["display_name"], "Ada");

    let (status, seen) = call(&app, "GET", &format!("/users/{}", a), Some(b), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(seen["avatar_url"], "https://cdn.example.com/ada.png");

    assert_eq!(seen["show_last_seen"], true);
    assert_eq!(seen["online"], false);

    let (status, profile) = call(
        &app,
        "PUT",
        "/users/me",
        Some(a),
        Some(json!({ "read_receipts": false, "show_last_seen": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["read_receipts"], false);
    assert_eq!(profile["display_name"], "Ada");

    let (status, body) = call(&app, "PUT", "/users/me", Some(a), Some(json!({ "about": "x".repeat(141) }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_PROFILE");
}
