use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::debug;
use uuid::Uuid;

use sayit_db::Database;
use sayit_db::models::{format_timestamp, parse_timestamp};
use sayit_db::queries;
use sayit_types::events::EventPayload;
use sayit_types::models::{DeliveryStatus, Message, Target};

use crate::clock::Clock;
use crate::directory;
use crate::dispatcher::Dispatcher;
use crate::error::CoreError;

/// In-memory head of one conversation's log. Guarded by a per-conversation
/// mutex: whoever holds it owns sequence assignment for that conversation.
#[derive(Debug)]
pub struct ConversationLog {
    participants: Vec<Uuid>,
    last_sequence: u64,
    last_created_at: Option<DateTime<Utc>>,
}

impl ConversationLog {
    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.participants.binary_search(&user_id).is_ok()
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Server time, never earlier than the previous message.
    fn next_timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_created_at {
            Some(last) if last > now => last,
            _ => now,
        }
    }

    fn advance(&mut self, message: &Message) {
        self.last_sequence = message.sequence;
        self.last_created_at = Some(message.created_at);
    }
}

/// Slot for one conversation's log. Empty until the first holder loads it
/// from the database.
type LogSlot = Arc<Mutex<Option<ConversationLog>>>;

/// Durable, strictly ordered message log per conversation.
pub struct MessageStore {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    dispatcher: Dispatcher,
    /// Only conversations with a caller inside or waiting on their critical
    /// section have an entry.
    logs: Mutex<HashMap<Uuid, LogSlot>>,
}

impl MessageStore {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>, dispatcher: Dispatcher) -> Self {
        Self {
            db,
            clock,
            dispatcher,
            logs: Mutex::new(HashMap::new()),
        }
    }

    /// Append a message from `sender_id`. Assigns the next sequence number,
    /// stamps server time, updates the conversation summary in the same
    /// transaction and, after commit, publishes `MessageAppended` to the
    /// conversation and `ConversationUpdated` to every participant's directory.
    pub fn append(&self, conversation_id: Uuid, sender_id: Uuid, text: &str) -> Result<Message, CoreError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CoreError::EmptyMessage);
        }

        self.with_log(conversation_id, |log| {
            if !log.has_participant(sender_id) {
                return Err(CoreError::InvalidConversation);
            }

            let message = Message {
                conversation_id,
                sequence: log.last_sequence + 1,
                sender_id,
                text: text.to_string(),
                created_at: log.next_timestamp(self.clock.now()),
                status: DeliveryStatus::Sent,
            };

            let conversation = self.db.transaction(|tx| {
                queries::insert_message(
                    tx,
                    &conversation_id.to_string(),
                    message.sequence,
                    &sender_id.to_string(),
                    &message.text,
                    &format_timestamp(message.created_at),
                )?;
                directory::on_message_appended(tx, &message)
            })?;
            log.advance(&message);

            debug!(
                "Appended {}#{} from {}",
                conversation_id, message.sequence, sender_id
            );
            self.dispatcher.publish(
                Target::Conversation(conversation_id),
                EventPayload::MessageAppended {
                    message: message.clone(),
                },
            );
            directory::publish_update(&self.dispatcher, &conversation);

            Ok(message)
        })
    }

    /// Messages with sequence > `after_sequence`, ascending, at most `limit`.
    /// Stateless: the caller resumes by passing the last sequence it saw.
    pub fn list_since(
        &self,
        conversation_id: Uuid,
        after_sequence: u64,
        limit: u32,
    ) -> Result<Vec<Message>, CoreError> {
        self.with_log(conversation_id, |_log| Ok(()))?;
        self.read_since(conversation_id, after_sequence, limit)
    }

    /// Lazy iterator over the whole log starting after `after_sequence`,
    /// fetching `page_size` messages per query.
    pub fn cursor(&self, conversation_id: Uuid, after_sequence: u64, page_size: u32) -> MessageCursor<'_> {
        MessageCursor {
            store: self,
            conversation_id,
            after: after_sequence,
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// The newest `limit` messages, ascending.
    pub fn latest(&self, conversation_id: Uuid, limit: u32) -> Result<Vec<Message>, CoreError> {
        self.with_log(conversation_id, |_log| Ok(()))?;
        self.read_latest(conversation_id, limit)
    }

    /// Move one message's status forward. Setting the current status again is a
    /// no-op and returns `Ok(false)`; moving backward is `InvalidTransition`.
    pub fn update_status(
        &self,
        conversation_id: Uuid,
        sequence: u64,
        status: DeliveryStatus,
    ) -> Result<bool, CoreError> {
        self.with_log(conversation_id, |_log| {
            let cid = conversation_id.to_string();
            let row = self
                .db
                .with_conn(|conn| queries::query_message(conn, &cid, sequence))?
                .ok_or(CoreError::UnknownMessage { sequence })?;
            let current: DeliveryStatus = row.status.parse().map_err(|e: String| anyhow!(e))?;

            if !current.can_advance_to(status) {
                return Err(CoreError::InvalidTransition {
                    from: current,
                    to: status,
                });
            }
            if current == status {
                return Ok(false);
            }

            self.db
                .with_conn_mut(|conn| queries::update_message_status(conn, &cid, sequence, status.as_str()))?;
            self.publish_status(conversation_id, &[sequence], status);
            Ok(true)
        })
    }

    /// Participants of an existing conversation.
    pub fn participants(&self, conversation_id: Uuid) -> Result<Vec<Uuid>, CoreError> {
        self.with_log(conversation_id, |log| Ok(log.participants.clone()))
    }

    /// Run `f` inside the conversation's critical section.
    pub(crate) fn with_log<T>(
        &self,
        conversation_id: Uuid,
        f: impl FnOnce(&mut ConversationLog) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let slot = self.acquire(conversation_id);
        let result = self.run_locked(&slot, conversation_id, f);
        drop(slot);
        self.release(conversation_id);
        result
    }

    /// Bulk status advance used by read/delivered watermarks. Runs inside the
    /// caller's transaction and conversation lock.
    pub(crate) fn advance_statuses(
        &self,
        conn: &Connection,
        conversation_id: Uuid,
        upto: u64,
        user_id: Uuid,
        status: DeliveryStatus,
    ) -> anyhow::Result<Vec<u64>> {
        let cid = conversation_id.to_string();
        let uid = user_id.to_string();
        match status {
            DeliveryStatus::Read => queries::advance_read_statuses(conn, &cid, upto, &uid),
            DeliveryStatus::Delivered => queries::advance_delivered_statuses(conn, &cid, upto, &uid),
            DeliveryStatus::Sent => Ok(Vec::new()),
        }
    }

    pub(crate) fn publish_status(&self, conversation_id: Uuid, sequences: &[u64], status: DeliveryStatus) {
        for &sequence in sequences {
            self.dispatcher.publish(
                Target::Conversation(conversation_id),
                EventPayload::StatusChanged {
                    conversation_id,
                    sequence,
                    status,
                },
            );
        }
    }

    /// Read without the existence check; for callers that already hold the log.
    pub(crate) fn read_latest(&self, conversation_id: Uuid, limit: u32) -> Result<Vec<Message>, CoreError> {
        let rows = self
            .db
            .get_latest_messages(&conversation_id.to_string(), limit)?;
        rows.into_iter()
            .map(|row| row.into_message().map_err(CoreError::from))
            .collect()
    }

    fn read_since(&self, conversation_id: Uuid, after: u64, limit: u32) -> Result<Vec<Message>, CoreError> {
        let rows = self
            .db
            .get_messages_after(&conversation_id.to_string(), after, limit)?;
        rows.into_iter()
            .map(|row| row.into_message().map_err(CoreError::from))
            .collect()
    }

    fn logs(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, LogSlot>> {
        self.logs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire(&self, conversation_id: Uuid) -> LogSlot {
        self.logs().entry(conversation_id).or_default().clone()
    }

    /// Drop the entry once nobody else holds it. The next caller reloads the
    /// log, which is safe because every earlier holder has committed by then.
    fn release(&self, conversation_id: Uuid) {
        let mut logs = self.logs();
        if logs
            .get(&conversation_id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            logs.remove(&conversation_id);
        }
    }

    fn run_locked<T>(
        &self,
        slot: &Mutex<Option<ConversationLog>>,
        conversation_id: Uuid,
        f: impl FnOnce(&mut ConversationLog) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let mut guard = slot
            .lock()
            .map_err(|_| CoreError::Unavailable(anyhow!("conversation {} lock poisoned", conversation_id)))?;
        if guard.is_none() {
            *guard = Some(
                self.load_log(conversation_id)?
                    .ok_or(CoreError::InvalidConversation)?,
            );
        }
        let Some(log) = guard.as_mut() else {
            return Err(CoreError::InvalidConversation);
        };
        f(log)
    }

    #[cfg(test)]
    fn cached_logs(&self) -> usize {
        self.logs().len()
    }

    fn load_log(&self, conversation_id: Uuid) -> Result<Option<ConversationLog>, CoreError> {
        let log = self.db.with_conn(|conn| {
            let cid = conversation_id.to_string();
            let Some((row, participant_rows)) = queries::query_conversation(conn, &cid)? else {
                return Ok(None);
            };
            let last_sequence = queries::max_sequence(conn, &cid)?;
            let last_created_at = match last_sequence {
                0 => None,
                seq => queries::query_message(conn, &cid, seq)?
                    .map(|m| parse_timestamp(&m.created_at))
                    .transpose()?,
            };
            let conversation = row.into_conversation(&participant_rows)?;

            Ok(Some(ConversationLog {
                participants: conversation.participants,
                last_sequence,
                last_created_at,
            }))
        })?;
        Ok(log)
    }
}

/// Restartable page-by-page reader. Holds no server-side state: the position
/// is just the last sequence returned.
pub struct MessageCursor<'a> {
    store: &'a MessageStore,
    conversation_id: Uuid,
    after: u64,
    page_size: u32,
    buffer: VecDeque<Message>,
    exhausted: bool,
}

impl MessageCursor<'_> {
    /// Sequence of the last message yielded; pass it to `cursor` to resume.
    pub fn position(&self) -> u64 {
        self.after
    }
}

impl Iterator for MessageCursor<'_> {
    type Item = Result<Message, CoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            match self
                .store
                .list_since(self.conversation_id, self.after, self.page_size)
            {
                Ok(page) => {
                    self.exhausted = page.len() < self.page_size as usize;
                    self.buffer.extend(page);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }

        let message = self.buffer.pop_front()?;
        self.after = message.sequence;
        Some(Ok(message))
    }
}
