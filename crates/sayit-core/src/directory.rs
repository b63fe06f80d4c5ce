use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use sayit_db::Database;
use sayit_db::models::{ParticipantRow, format_timestamp};
use sayit_db::queries;
use sayit_types::events::EventPayload;
use sayit_types::models::{Conversation, DeliveryStatus, Message, Target};

use crate::clock::Clock;
use crate::dispatcher::Dispatcher;
use crate::error::CoreError;
use crate::store::MessageStore;

/// Per-user conversation summaries: last message, unread counts, ordering.
pub struct ConversationDirectory {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    dispatcher: Dispatcher,
    store: Arc<MessageStore>,
}

impl ConversationDirectory {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>, dispatcher: Dispatcher, store: Arc<MessageStore>) -> Self {
        Self {
            db,
            clock,
            dispatcher,
            store,
        }
    }

    /// The conversation with exactly this participant set, created if needed.
    /// Order and duplicates in `participant_ids` do not matter.
    pub fn get_or_create(&self, participant_ids: &[Uuid]) -> Result<Conversation, CoreError> {
        let mut members = participant_ids.to_vec();
        members.sort();
        members.dedup();
        if members.len() < 2 {
            return Err(CoreError::InvalidParticipants);
        }

        let key = participant_key(&members);
        if let Some(id) = self
            .db
            .with_conn(|conn| queries::find_conversation_by_key(conn, &key))?
        {
            return self.load(&id);
        }

        // Re-check under the writer so two racing creators end up with one row.
        let (conversation, created) = self.db.transaction(|tx| {
            if let Some(id) = queries::find_conversation_by_key(tx, &key)? {
                return Ok((load_conversation(tx, &id)?, false));
            }

            let id = Uuid::new_v4().to_string();
            let ids: Vec<String> = members.iter().map(Uuid::to_string).collect();
            queries::insert_conversation(tx, &id, &key, &format_timestamp(self.clock.now()), &ids)?;
            Ok((load_conversation(tx, &id)?, true))
        })?;

        if created {
            info!(
                "Created conversation {} for {} participants",
                conversation.id,
                conversation.participants.len()
            );
            // Publish under the conversation lock so a first append cannot
            // overtake the creation event.
            self.store.with_log(conversation.id, |_log| {
                publish_update(&self.dispatcher, &conversation);
                Ok(())
            })?;
        }
        Ok(conversation)
    }

    /// One conversation as seen by `user_id`, who must be a participant.
    pub fn get(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Conversation, CoreError> {
        let conversation = self.load(&conversation_id.to_string())?;
        if !conversation.has_participant(user_id) {
            return Err(CoreError::InvalidConversation);
        }
        Ok(conversation)
    }

    /// Advance `user_id`'s read watermark to `upto_sequence` (clamped to the
    /// last message), recompute their unread count and move every message up
    /// to it that `user_id` did not send to `read`. Users who turned read
    /// receipts off only get the unread bookkeeping and `delivered`.
    pub fn mark_read(&self, conversation_id: Uuid, user_id: Uuid, upto_sequence: u64) -> Result<(), CoreError> {
        self.store.with_log(conversation_id, |log| {
            if !log.has_participant(user_id) {
                return Err(CoreError::InvalidConversation);
            }
            let upto = upto_sequence.min(log.last_sequence());
            let cid = conversation_id.to_string();
            let uid = user_id.to_string();

            let (delivered, read, conversation) = self.db.transaction(|tx| {
                queries::advance_read_watermark(tx, &cid, &uid, upto)?;
                queries::recount_unread(tx, &cid, &uid)?;
                let delivered =
                    self.store
                        .advance_statuses(tx, conversation_id, upto, user_id, DeliveryStatus::Delivered)?;
                let read = if queries::read_receipts_enabled(tx, &uid)? {
                    self.store
                        .advance_statuses(tx, conversation_id, upto, user_id, DeliveryStatus::Read)?
                } else {
                    Vec::new()
                };
                Ok((delivered, read, load_conversation(tx, &cid)?))
            })?;

            self.store
                .publish_status(conversation_id, &delivered, DeliveryStatus::Delivered);
            self.store
                .publish_status(conversation_id, &read, DeliveryStatus::Read);
            publish_update(&self.dispatcher, &conversation);
            Ok(())
        })
    }

    /// Advance `user_id`'s delivered watermark. `sent` messages up to it from
    /// other participants move to `delivered`. Unread counts are unaffected.
    pub fn mark_delivered(&self, conversation_id: Uuid, user_id: Uuid, upto_sequence: u64) -> Result<(), CoreError> {
        self.store.with_log(conversation_id, |log| {
            if !log.has_participant(user_id) {
                return Err(CoreError::InvalidConversation);
            }
            let upto = upto_sequence.min(log.last_sequence());
            let cid = conversation_id.to_string();
            let uid = user_id.to_string();

            let delivered = self.db.transaction(|tx| {
                queries::advance_delivered_watermark(tx, &cid, &uid, upto)?;
                self.store
                    .advance_statuses(tx, conversation_id, upto, user_id, DeliveryStatus::Delivered)
            })?;

            self.store
                .publish_status(conversation_id, &delivered, DeliveryStatus::Delivered);
            Ok(())
        })
    }

    /// Every conversation of `user_id`, most recent activity first, ties by id.
    pub fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>, CoreError> {
        let (rows, participants) = self
            .db
            .list_conversations_for_user(&user_id.to_string())?;

        let mut by_conversation: HashMap<String, Vec<ParticipantRow>> = HashMap::new();
        for p in participants {
            by_conversation
                .entry(p.conversation_id.clone())
                .or_default()
                .push(p);
        }

        let conversations = rows
            .into_iter()
            .map(|row| {
                let members = by_conversation.remove(&row.id).unwrap_or_default();
                row.into_conversation(&members)
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(conversations)
    }

    fn load(&self, id: &str) -> Result<Conversation, CoreError> {
        let row = self.db.get_conversation(id)?;
        let Some((row, participants)) = row else {
            return Err(CoreError::InvalidConversation);
        };
        Ok(row.into_conversation(&participants)?)
    }
}

/// Apply a freshly inserted message to its conversation summary: last message
/// and unread counts of everyone but the sender. Runs in the append transaction.
pub fn on_message_appended(conn: &Connection, message: &Message) -> anyhow::Result<Conversation> {
    let cid = message.conversation_id.to_string();
    let sender = message.sender_id.to_string();

    queries::record_last_message(
        conn,
        &cid,
        message.sequence,
        &message.text,
        &sender,
        &format_timestamp(message.created_at),
    )?;
    queries::increment_unread(conn, &cid, &sender)?;
    load_conversation(conn, &cid)
}

/// Push the new summary to the directory of every participant.
pub fn publish_update(dispatcher: &Dispatcher, conversation: &Conversation) {
    for &participant in &conversation.participants {
        dispatcher.publish(
            Target::Directory(participant),
            EventPayload::ConversationUpdated {
                conversation: conversation.clone(),
            },
        );
    }
}

/// Order-independent identity of a participant set. Expects `sorted` ids.
pub fn participant_key(sorted: &[Uuid]) -> String {
    let mut hasher = Sha256::new();
    for (i, id) in sorted.iter().enumerate() {
        if i > 0 {
            hasher.update(b",");
        }
        hasher.update(id.as_hyphenated().to_string().as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn load_conversation(conn: &Connection, id: &str) -> anyhow::Result<Conversation> {
    let (row, participants) =
        queries::query_conversation(conn, id)?.ok_or_else(|| anyhow!("conversation {} disappeared", id))?;
    row.into_conversation(&participants)
}
