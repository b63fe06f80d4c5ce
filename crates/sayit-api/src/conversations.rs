use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use sayit_types::api::StartConversationRequest;

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::state::AppState;

/// Returns the existing conversation when the caller already has one with
/// exactly these participants.
pub async fn start_conversation(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<StartConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .run(move |chat| chat.start_conversation(user_id, &req.participant_ids))
        .await?;
    Ok(Json(conversation))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let conversations = state
        .run(move |chat| chat.get_conversations(user_id))
        .await?;
    Ok(Json(conversations))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .run(move |chat| chat.get_conversation(user_id, conversation_id))
        .await?;
    Ok(Json(conversation))
}
