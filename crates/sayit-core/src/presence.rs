use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::clock::Clock;

/// Advisory typing record for one user in one conversation. Last writer wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingState {
    pub is_typing: bool,
    pub expires_at: DateTime<Utc>,
    /// Expiry subscribers were last told about.
    pub announced_until: DateTime<Utc>,
}

/// Result of a `set_typing` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingUpdate {
    /// Subscribers need a fresh `TypingChanged`: either the user just started
    /// or the last announced expiry is about to run out.
    pub announce: bool,
    pub expires_at: DateTime<Utc>,
}

/// Tracks who is typing where and who has a live connection. Nothing is
/// persisted; typing expiry is evaluated on read, so sweeping only reclaims
/// memory and reports stale entries.
///
/// Callers that publish typing events serialize per conversation themselves;
/// the tracker only keeps each record consistent.
pub struct PresenceTracker {
    clock: Arc<dyn Clock>,
    timeout: chrono::Duration,
    /// conversation_id -> (user_id -> state)
    conversations: RwLock<HashMap<Uuid, HashMap<Uuid, TypingState>>>,
    /// user_id -> open gateway connections
    connections: RwLock<HashMap<Uuid, usize>>,
}

impl PresenceTracker {
    pub fn new(clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            clock,
            timeout: chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::seconds(3)),
            conversations: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Mark the user as typing until now + timeout. Repeated calls extend the
    /// expiry and only ask for an announcement once less than half of the last
    /// announced window is left.
    pub fn set_typing(&self, conversation_id: Uuid, user_id: Uuid) -> TypingUpdate {
        let now = self.clock.now();
        let expires_at = now + self.timeout;

        let mut conversations = self
            .conversations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let users = conversations.entry(conversation_id).or_default();
        let previous = users
            .get(&user_id)
            .filter(|state| state.is_typing && now < state.expires_at);

        let announce = match previous {
            None => true,
            Some(state) => state.announced_until - now < self.timeout / 2,
        };
        let announced_until = match previous {
            Some(state) if !announce => state.announced_until,
            _ => expires_at,
        };
        users.insert(
            user_id,
            TypingState {
                is_typing: true,
                expires_at,
                announced_until,
            },
        );

        TypingUpdate { announce, expires_at }
    }

    /// Clear the indicator now. Returns whether the user was actively typing.
    pub fn clear_typing(&self, conversation_id: Uuid, user_id: Uuid) -> bool {
        let now = self.clock.now();
        let mut conversations = self
            .conversations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(state) = conversations
            .get_mut(&conversation_id)
            .and_then(|users| users.get_mut(&user_id))
        else {
            return false;
        };

        let was_typing = state.is_typing && now < state.expires_at;
        state.is_typing = false;
        was_typing
    }

    pub fn is_typing(&self, conversation_id: Uuid, user_id: Uuid) -> bool {
        let now = self.clock.now();
        let conversations = self
            .conversations
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        conversations
            .get(&conversation_id)
            .and_then(|users| users.get(&user_id))
            .is_some_and(|state| state.is_typing && now < state.expires_at)
    }

    pub fn state(&self, conversation_id: Uuid, user_id: Uuid) -> Option<TypingState> {
        let conversations = self
            .conversations
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        conversations
            .get(&conversation_id)
            .and_then(|users| users.get(&user_id))
            .copied()
    }

    /// Users currently typing in the conversation, sorted.
    pub fn typing_users(&self, conversation_id: Uuid) -> Vec<Uuid> {
        let now = self.clock.now();
        let conversations = self
            .conversations
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut users: Vec<Uuid> = conversations
            .get(&conversation_id)
            .map(|users| {
                users
                    .iter()
                    .filter(|(_, state)| state.is_typing && now < state.expires_at)
                    .map(|(user_id, _)| *user_id)
                    .collect()
            })
            .unwrap_or_default();
        users.sort();
        users
    }

    /// Drop cleared records and return the `(conversation_id, user_id)` pairs
    /// that stopped typing by timing out. Those stay until [`Self::expire`]
    /// removes them, so the caller can announce each one in order with
    /// whatever else happens in that conversation.
    pub fn lapsed(&self) -> Vec<(Uuid, Uuid)> {
        let now = self.clock.now();
        let mut lapsed = Vec::new();
        let mut conversations = self
            .conversations
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        conversations.retain(|conversation_id, users| {
            users.retain(|user_id, state| {
                if state.is_typing && now >= state.expires_at {
                    lapsed.push((*conversation_id, *user_id));
                }
                state.is_typing
            });
            !users.is_empty()
        });

        lapsed.sort();
        lapsed
    }

    /// Remove a record that timed out while typing. Returns false when the
    /// user has refreshed or cleared it in the meantime.
    pub fn expire(&self, conversation_id: Uuid, user_id: Uuid) -> bool {
        let now = self.clock.now();
        let mut conversations = self
            .conversations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(users) = conversations.get_mut(&conversation_id) else {
            return false;
        };

        let lapsed = users
            .get(&user_id)
            .is_some_and(|state| state.is_typing && now >= state.expires_at);
        if lapsed {
            users.remove(&user_id);
            if users.is_empty() {
                conversations.remove(&conversation_id);
            }
        }
        lapsed
    }

    // -- Connections --

    /// Count a new gateway connection. Returns true if the user just came online.
    pub fn connect(&self, user_id: Uuid) -> bool {
        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let count = connections.entry(user_id).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Count a closed connection. Returns true if it was the user's last one.
    pub fn disconnect(&self, user_id: Uuid) -> bool {
        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match connections.get_mut(&user_id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                connections.remove(&user_id);
                true
            }
            None => false,
        }
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&user_id)
    }
}
