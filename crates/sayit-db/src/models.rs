/// Database row types — these map directly to SQLite rows.
/// Conversion into sayit-types models happens here so callers never touch raw strings.
use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use sayit_types::models::{Conversation, LastMessageSummary, Message, Profile};

/// Timestamps are stored as fixed-width RFC 3339 in UTC so that text ordering
/// matches time ordering.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("corrupt timestamp '{}'", raw))?
        .with_timezone(&Utc))
}

fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("corrupt id '{}'", raw))
}

pub struct ConversationRow {
    pub id: String,
    pub participant_key: String,
    pub created_at: String,
    pub last_sequence: i64,
    pub last_text: Option<String>,
    pub last_sender_id: Option<String>,
    pub last_message_at: Option<String>,
}

pub struct ParticipantRow {
    pub conversation_id: String,
    pub user_id: String,
    pub unread_count: i64,
    pub read_upto: i64,
    pub delivered_upto: i64,
}

pub struct MessageRow {
    pub conversation_id: String,
    pub sequence: i64,
    pub sender_id: String,
    pub text: String,
    pub created_at: String,
    pub status: String,
}

pub struct ProfileRow {
    pub id: String,
    pub display_name: String,
    pub about: String,
    pub avatar_url: Option<String>,
    pub show_last_seen: bool,
    pub read_receipts: bool,
    pub last_seen_at: Option<String>,
    pub updated_at: String,
}

impl ConversationRow {
    /// Build the model from this row and its participant rows. Rows for other
    /// conversations are ignored.
    pub fn into_conversation(self, participants: &[ParticipantRow]) -> Result<Conversation> {
        let mut members = Vec::new();
        let mut unread_counts = BTreeMap::new();
        for p in participants.iter().filter(|p| p.conversation_id == self.id) {
            let user_id = parse_id(&p.user_id)?;
            members.push(user_id);
            unread_counts.insert(user_id, p.unread_count.max(0) as u64);
        }
        members.sort();

        let last_message = match (self.last_text, self.last_sender_id, self.last_message_at) {
            (Some(text), Some(sender_id), Some(at)) if self.last_sequence > 0 => {
                Some(LastMessageSummary {
                    sequence: self.last_sequence as u64,
                    text,
                    sender_id: parse_id(&sender_id)?,
                    timestamp: parse_timestamp(&at)?,
                })
            }
            _ => None,
        };

        Ok(Conversation {
            id: parse_id(&self.id)?,
            participants: members,
            created_at: parse_timestamp(&self.created_at)?,
            last_message,
            unread_counts,
        })
    }
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message> {
        Ok(Message {
            conversation_id: parse_id(&self.conversation_id)?,
            sequence: self.sequence as u64,
            sender_id: parse_id(&self.sender_id)?,
            created_at: parse_timestamp(&self.created_at)?,
            status: self
                .status
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?,
            text: self.text,
        })
    }
}

impl ProfileRow {
    pub fn into_profile(self) -> Result<Profile> {
        Ok(Profile {
            user_id: parse_id(&self.id)?,
            display_name: self.display_name,
            about: self.about,
            avatar_url: self.avatar_url,
            show_last_seen: self.show_last_seen,
            read_receipts: self.read_receipts,
            last_seen_at: self.last_seen_at.as_deref().map(parse_timestamp).transpose()?,
            online: false,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}
