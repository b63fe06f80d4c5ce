use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Conversation, DeliveryStatus, Message, Target};

/// Frames sent over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful identification
    Ready { user_id: Uuid, subscriber_id: Uuid },

    /// Full current state of a target, sent once per subscribe before any events
    Snapshot { target: Target, state: SnapshotState },

    /// Incremental change to a target the client is subscribed to
    Event { target: Target, payload: EventPayload },

    /// A command from this client was rejected
    Error { code: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SnapshotState {
    /// The conversation summary, who is typing right now and its newest
    /// messages in ascending sequence order. `messages` is capped at the
    /// server's snapshot limit (200 by default); when the first entry's
    /// sequence is above 1, page older history with `GetMessages`.
    Conversation {
        conversation: Conversation,
        messages: Vec<Message>,
        typing: Vec<Uuid>,
    },
    /// The user's conversation list, newest activity first.
    Directory { conversations: Vec<Conversation> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    MessageAppended {
        message: Message,
    },
    StatusChanged {
        conversation_id: Uuid,
        sequence: u64,
        status: DeliveryStatus,
    },
    TypingChanged {
        conversation_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
        /// Set while typing so clients can expire the indicator locally.
        expires_at: Option<DateTime<Utc>>,
    },
    ConversationUpdated {
        conversation: Conversation,
    },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Start receiving a snapshot and then live events for a target.
    /// Re-subscribing to the same target replaces the earlier subscription.
    Subscribe { target: Target },

    /// Stop receiving events for a target. Unknown targets are ignored.
    Unsubscribe { target: Target },

    /// Indicate typing in a conversation
    StartTyping { conversation_id: Uuid },

    /// Clear the typing indicator before it expires
    StopTyping { conversation_id: Uuid },

    /// Acknowledge that messages up to `upto_sequence` reached this device
    AckDelivered {
        conversation_id: Uuid,
        upto_sequence: u64,
    },
}
