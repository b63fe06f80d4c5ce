use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery state of a single message. Ordered: `Sent < Delivered < Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    /// Statuses only move forward. Setting the current status again is allowed
    /// and changes nothing.
    pub fn can_advance_to(&self, next: DeliveryStatus) -> bool {
        next >= *self
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            other => Err(format!("unknown delivery status '{}'", other)),
        }
    }
}

/// A message as stored in its conversation's log.
/// `(conversation_id, sequence)` is the identity; sequences start at 1 and are gap-free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub conversation_id: Uuid,
    pub sequence: u64,
    pub sender_id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub status: DeliveryStatus,
}

/// Denormalized copy of the newest message, kept on the conversation row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessageSummary {
    pub sequence: u64,
    pub text: String,
    pub sender_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    /// Sorted ascending, no duplicates, at least two entries.
    pub participants: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_message: Option<LastMessageSummary>,
    pub unread_counts: BTreeMap<Uuid, u64>,
}

impl Conversation {
    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.participants.binary_search(&user_id).is_ok()
    }

    pub fn unread_for(&self, user_id: Uuid) -> u64 {
        self.unread_counts.get(&user_id).copied().unwrap_or(0)
    }
}

/// Public profile. The avatar is a URL into external blob storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: Uuid,
    pub display_name: String,
    pub about: String,
    pub avatar_url: Option<String>,
    /// Whether others may see `online` and `last_seen_at`.
    pub show_last_seen: bool,
    /// When off, reading a conversation does not flip messages to `read`.
    pub read_receipts: bool,
    /// When the user's last gateway connection closed.
    pub last_seen_at: Option<DateTime<Utc>>,
    /// Has at least one open gateway connection right now.
    pub online: bool,
    pub updated_at: DateTime<Utc>,
}

/// What a subscription listens to.
///
/// Serialized as `"conversation:<uuid>"` or `"directory:<uuid>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Target {
    Conversation(Uuid),
    Directory(Uuid),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conversation(id) => write!(f, "conversation:{}", id),
            Self::Directory(user_id) => write!(f, "directory:{}", user_id),
        }
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("target '{}' is missing a ':'", s))?;
        let id: Uuid = id
            .parse()
            .map_err(|e| format!("target '{}' has a bad id: {}", s, e))?;
        match kind {
            "conversation" => Ok(Self::Conversation(id)),
            "directory" => Ok(Self::Directory(id)),
            other => Err(format!("unknown target kind '{}'", other)),
        }
    }
}

impl TryFrom<String> for Target {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Target> for String {
    fn from(target: Target) -> Self {
        target.to_string()
    }
}
