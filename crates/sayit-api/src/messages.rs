use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use sayit_types::api::{SendMessageRequest, WatermarkRequest};

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    /// Return messages with a sequence strictly greater than this.
    #[serde(default)]
    pub after: u64,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .run(move |chat| chat.send_message(user_id, conversation_id, &req.text))
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state
        .run(move |chat| chat.get_messages(user_id, conversation_id, query.after, query.limit))
        .await?;
    Ok(Json(messages))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<WatermarkRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .run(move |chat| chat.mark_read(user_id, conversation_id, req.upto_sequence))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_delivered(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<WatermarkRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .run(move |chat| chat.mark_delivered(user_id, conversation_id, req.upto_sequence))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
