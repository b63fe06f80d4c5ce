use std::sync::Arc;

use tracing::error;

use sayit_core::{ChatService, CoreError};

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub chat: ChatService,
    pub jwt_secret: String,
}

impl AppStateInner {
    pub fn new(chat: ChatService, jwt_secret: String) -> AppState {
        Arc::new(Self { chat, jwt_secret })
    }

    /// Run a blocking chat call off the async runtime.
    pub async fn run<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&ChatService) -> Result<T, CoreError> + Send + 'static,
        T: Send + 'static,
    {
        let chat = self.chat.clone();
        tokio::task::spawn_blocking(move || f(&chat))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal
            })?
            .map_err(ApiError::from)
    }
}
