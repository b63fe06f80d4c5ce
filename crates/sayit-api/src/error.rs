use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};

use sayit_core::{CoreError, ErrorKind};
use sayit_types::api::ErrorResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("missing or invalid credentials")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("internal error")]
    Internal,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Core(e) => match e {
                CoreError::InvalidConversation | CoreError::UnknownMessage { .. } => StatusCode::NOT_FOUND,
                CoreError::InvalidTransition { .. } => StatusCode::CONFLICT,
                CoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                CoreError::Consistency(_) => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_REQUEST,
            },
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Core(e) => e.code(),
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Internal => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Core(e) = &self {
            match e.kind() {
                ErrorKind::Unavailable => warn!("Storage unavailable: {:#}", e),
                ErrorKind::Consistency => error!("Consistency violation: {}", e),
                ErrorKind::Validation => {}
            }
        }

        // Internal details stay in the log.
        let message = match &self {
            Self::Core(CoreError::Unavailable(_)) => "storage unavailable, try again".to_string(),
            Self::Core(CoreError::Consistency(_)) | Self::Internal => "internal error".to_string(),
            other => other.to_string(),
        };

        let body = ErrorResponse {
            error: self.code().to_string(),
            message,
        };
        (self.status(), Json(body)).into_response()
    }
}
