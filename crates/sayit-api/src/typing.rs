use axum::{
    Extension,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::state::AppState;

/// Typing is advisory: unknown conversations are accepted and ignored.
pub async fn start_typing(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<StatusCode, ApiError> {
    state
        .run(move |chat| chat.set_typing(user_id, conversation_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn stop_typing(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<StatusCode, ApiError> {
    state
        .run(move |chat| chat.clear_typing(user_id, conversation_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
