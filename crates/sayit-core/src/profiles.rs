use std::sync::Arc;

use uuid::Uuid;

use sayit_db::Database;
use sayit_db::models::{ProfileRow, format_timestamp};
use sayit_db::queries;
use sayit_types::api::UpdateProfileRequest;
use sayit_types::models::Profile;

use crate::clock::Clock;
use crate::error::CoreError;

pub const MAX_DISPLAY_NAME_CHARS: usize = 64;
pub const MAX_ABOUT_CHARS: usize = 140;
pub const MAX_AVATAR_URL_LEN: usize = 2048;

/// Display name, status line and avatar reference of a user. Avatar bytes live
/// in an external blob store; only the URL is kept here.
pub struct ProfileStore {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
}

impl ProfileStore {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub fn get(&self, user_id: Uuid) -> Result<Option<Profile>, CoreError> {
        let row = self.db.get_profile(&user_id.to_string())?;
        Ok(row.map(ProfileRow::into_profile).transpose()?)
    }

    /// Stamp the moment the user went offline.
    pub fn touch_last_seen(&self, user_id: Uuid) -> Result<(), CoreError> {
        let now = format_timestamp(self.clock.now());
        self.db
            .with_conn_mut(|conn| queries::touch_last_seen(conn, &user_id.to_string(), &now))?;
        Ok(())
    }

    /// Apply the fields present in `req`. An empty `avatar_url` removes the avatar.
    pub fn update(&self, user_id: Uuid, req: UpdateProfileRequest) -> Result<Profile, CoreError> {
        let display_name = req.display_name.map(|n| n.trim().to_string());
        if let Some(name) = &display_name {
            if name.is_empty() || name.chars().count() > MAX_DISPLAY_NAME_CHARS {
                return Err(CoreError::InvalidProfile(format!(
                    "display name must be 1-{} characters",
                    MAX_DISPLAY_NAME_CHARS
                )));
            }
        }

        let about = req.about.map(|a| a.trim().to_string());
        if about
            .as_ref()
            .is_some_and(|a| a.chars().count() > MAX_ABOUT_CHARS)
        {
            return Err(CoreError::InvalidProfile(format!(
                "about must be at most {} characters",
                MAX_ABOUT_CHARS
            )));
        }

        let avatar_url = match req.avatar_url.map(|u| u.trim().to_string()) {
            Some(url) if url.is_empty() => Some(None),
            Some(url) => {
                validate_avatar_url(&url)?;
                Some(Some(url))
            }
            None => None,
        };

        let id = user_id.to_string();
        let now = format_timestamp(self.clock.now());
        let row = self.db.transaction(|tx| {
            let current = queries::query_profile(tx, &id)?;
            let row = ProfileRow {
                id: id.clone(),
                display_name: display_name
                    .or_else(|| current.as_ref().map(|p| p.display_name.clone()))
                    .unwrap_or_default(),
                about: about
                    .or_else(|| current.as_ref().map(|p| p.about.clone()))
                    .unwrap_or_default(),
                show_last_seen: req
                    .show_last_seen
                    .or_else(|| current.as_ref().map(|p| p.show_last_seen))
                    .unwrap_or(true),
                read_receipts: req
                    .read_receipts
                    .or_else(|| current.as_ref().map(|p| p.read_receipts))
                    .unwrap_or(true),
                last_seen_at: current.as_ref().and_then(|p| p.last_seen_at.clone()),
                avatar_url: avatar_url.unwrap_or_else(|| current.and_then(|p| p.avatar_url)),
                updated_at: now,
            };
            queries::upsert_profile(tx, &row)?;
            Ok(row)
        })?;

        Ok(row.into_profile()?)
    }
}

fn validate_avatar_url(url: &str) -> Result<(), CoreError> {
    if url.len() > MAX_AVATAR_URL_LEN {
        return Err(CoreError::InvalidProfile(format!(
            "avatar url must be at most {} bytes",
            MAX_AVATAR_URL_LEN
        )));
    }
    let host = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    match host {
        Some(rest) if !rest.is_empty() && !rest.contains(char::is_whitespace) => Ok(()),
        _ => Err(CoreError::InvalidProfile(
            "avatar url must be an http(s) url".into(),
        )),
    }
}
