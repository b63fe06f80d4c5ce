use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use sayit_types::api::UpdateProfileRequest;
use sayit_types::models::Profile;

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::state::AppState;

pub async fn get_me(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Json<Profile>, ApiError> {
    fetch(&state, user_id, user_id).await
}

pub async fn get_profile(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(AuthUser(viewer)): Extension<AuthUser>,
) -> Result<Json<Profile>, ApiError> {
    fetch(&state, viewer, user_id).await
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state
        .run(move |chat| chat.update_profile(user_id, req))
        .await?;
    Ok(Json(profile))
}

async fn fetch(state: &AppState, viewer: Uuid, user_id: Uuid) -> Result<Json<Profile>, ApiError> {
    let profile = state
        .run(move |chat| chat.get_profile(viewer, user_id))
        .await?
        .ok_or(ApiError::NotFound("profile"))?;
    Ok(Json(profile))
}
