use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;

use sayit_gateway::connection;

use crate::middleware::require_auth;
use crate::state::AppState;
use crate::{conversations, messages, profiles, typing};

/// Every HTTP and WebSocket route. Layers such as tracing and CORS are added by
/// the binary.
pub fn router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route(
            "/conversations",
            post(conversations::start_conversation).get(conversations::list_conversations),
        )
        .route("/conversations/{conversation_id}", get(conversations::get_conversation))
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/conversations/{conversation_id}/read", post(messages::mark_read))
        .route("/conversations/{conversation_id}/delivered", post(messages::mark_delivered))
        .route(
            "/conversations/{conversation_id}/typing",
            post(typing::start_typing).delete(typing::stop_typing),
        )
        .route("/users/me", get(profiles::get_me).put(profiles::update_me))
        .route("/users/{user_id}", get(profiles::get_profile))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    // The gateway authenticates with its own Identify frame.
    let public_routes = Router::new()
        .route("/gateway", get(ws_upgrade))
        .route("/health", get(health));

    Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .with_state(state)
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let chat = state.chat.clone();
    let jwt_secret = state.jwt_secret.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, chat, jwt_secret))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
