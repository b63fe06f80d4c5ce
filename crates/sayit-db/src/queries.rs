//! Query functions take a `&Connection` so they compose inside
//! `Database::transaction` (a `Transaction` derefs to `Connection`).
use crate::models::{ConversationRow, MessageRow, ParticipantRow, ProfileRow};
use crate::Database;
use anyhow::Result;
use rusqlite::{Connection, Row, params};

impl Database {
    // -- Conversations --

    pub fn get_conversation(&self, id: &str) -> Result<Option<(ConversationRow, Vec<ParticipantRow>)>> {
        self.with_conn(|conn| query_conversation(conn, id))
    }

    pub fn list_conversations_for_user(
        &self,
        user_id: &str,
    ) -> Result<(Vec<ConversationRow>, Vec<ParticipantRow>)> {
        self.with_conn(|conn| query_conversations_for_user(conn, user_id))
    }

    // -- Messages --

    pub fn get_messages_after(&self, conversation_id: &str, after: u64, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages_after(conn, conversation_id, after, limit))
    }

    pub fn get_latest_messages(&self, conversation_id: &str, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_latest_messages(conn, conversation_id, limit))
    }

    // -- Profiles --

    pub fn get_profile(&self, user_id: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| query_profile(conn, user_id))
    }
}

// -- Conversations --

pub fn find_conversation_by_key(conn: &Connection, participant_key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM conversations WHERE participant_key = ?1",
        [participant_key],
        |row| row.get(0),
    )
    .optional()
}

pub fn insert_conversation(
    conn: &Connection,
    id: &str,
    participant_key: &str,
    created_at: &str,
    participants: &[String],
) -> Result<()> {
    conn.execute(
        "INSERT INTO conversations (id, participant_key, created_at) VALUES (?1, ?2, ?3)",
        params![id, participant_key, created_at],
    )?;

    let mut stmt =
        conn.prepare("INSERT INTO participants (conversation_id, user_id) VALUES (?1, ?2)")?;
    for user_id in participants {
        stmt.execute(params![id, user_id])?;
    }
    Ok(())
}

pub fn query_conversation(
    conn: &Connection,
    id: &str,
) -> Result<Option<(ConversationRow, Vec<ParticipantRow>)>> {
    let row = conn
        .query_row(
            "SELECT id, participant_key, created_at, last_sequence, last_text, last_sender_id, last_message_at
             FROM conversations WHERE id = ?1",
            [id],
            conversation_from_row,
        )
        .optional()?;

    let Some(row) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT conversation_id, user_id, unread_count, read_upto, delivered_upto
         FROM participants WHERE conversation_id = ?1",
    )?;
    let participants = stmt
        .query_map([id], participant_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Some((row, participants)))
}

/// All conversations the user takes part in, newest activity first, ties broken
/// by id ascending. Also returns every participant row of those conversations.
pub fn query_conversations_for_user(
    conn: &Connection,
    user_id: &str,
) -> Result<(Vec<ConversationRow>, Vec<ParticipantRow>)> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.participant_key, c.created_at, c.last_sequence, c.last_text, c.last_sender_id, c.last_message_at
         FROM conversations c
         JOIN participants me ON me.conversation_id = c.id
         WHERE me.user_id = ?1
         ORDER BY COALESCE(c.last_message_at, c.created_at) DESC, c.id ASC",
    )?;
    let conversations = stmt
        .query_map([user_id], conversation_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    // Single JOIN for the participant rows instead of one query per conversation
    let mut stmt = conn.prepare(
        "SELECT p.conversation_id, p.user_id, p.unread_count, p.read_upto, p.delivered_upto
         FROM participants p
         JOIN participants me ON me.conversation_id = p.conversation_id
         WHERE me.user_id = ?1",
    )?;
    let participants = stmt
        .query_map([user_id], participant_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok((conversations, participants))
}

pub fn record_last_message(
    conn: &Connection,
    conversation_id: &str,
    sequence: u64,
    text: &str,
    sender_id: &str,
    at: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE conversations
         SET last_sequence = ?2, last_text = ?3, last_sender_id = ?4, last_message_at = ?5
         WHERE id = ?1",
        params![conversation_id, sequence as i64, text, sender_id, at],
    )?;
    Ok(())
}

pub fn increment_unread(conn: &Connection, conversation_id: &str, except_user_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE participants SET unread_count = unread_count + 1
         WHERE conversation_id = ?1 AND user_id != ?2",
        params![conversation_id, except_user_id],
    )?;
    Ok(())
}

/// Moves the read watermark forward (never backward). Reading implies delivery,
/// so the delivered watermark follows.
pub fn advance_read_watermark(conn: &Connection, conversation_id: &str, user_id: &str, upto: u64) -> Result<()> {
    conn.execute(
        "UPDATE participants
         SET read_upto = MAX(read_upto, ?3), delivered_upto = MAX(delivered_upto, ?3)
         WHERE conversation_id = ?1 AND user_id = ?2",
        params![conversation_id, user_id, upto as i64],
    )?;
    Ok(())
}

pub fn advance_delivered_watermark(
    conn: &Connection,
    conversation_id: &str,
    user_id: &str,
    upto: u64,
) -> Result<()> {
    conn.execute(
        "UPDATE participants SET delivered_upto = MAX(delivered_upto, ?3)
         WHERE conversation_id = ?1 AND user_id = ?2",
        params![conversation_id, user_id, upto as i64],
    )?;
    Ok(())
}

/// Recomputes the unread counter from the read watermark: messages after the
/// watermark that the user did not send.
pub fn recount_unread(conn: &Connection, conversation_id: &str, user_id: &str) -> Result<u64> {
    conn.execute(
        "UPDATE participants SET unread_count = (
             SELECT COUNT(*) FROM messages m
             WHERE m.conversation_id = participants.conversation_id
               AND m.sequence > participants.read_upto
               AND m.sender_id != participants.user_id)
         WHERE conversation_id = ?1 AND user_id = ?2",
        params![conversation_id, user_id],
    )?;

    let count: i64 = conn.query_row(
        "SELECT unread_count FROM participants WHERE conversation_id = ?1 AND user_id = ?2",
        params![conversation_id, user_id],
        |row| row.get(0),
    )?;
    Ok(count.max(0) as u64)
}

// -- Messages --

pub fn insert_message(
    conn: &Connection,
    conversation_id: &str,
    sequence: u64,
    sender_id: &str,
    text: &str,
    created_at: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (conversation_id, sequence, sender_id, text, created_at, status)
         VALUES (?1, ?2, ?3, ?4, ?5, 'sent')",
        params![conversation_id, sequence as i64, sender_id, text, created_at],
    )?;
    Ok(())
}

pub fn max_sequence(conn: &Connection, conversation_id: &str) -> Result<u64> {
    let max: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sequence), 0) FROM messages WHERE conversation_id = ?1",
        [conversation_id],
        |row| row.get(0),
    )?;
    Ok(max.max(0) as u64)
}

pub fn query_message(conn: &Connection, conversation_id: &str, sequence: u64) -> Result<Option<MessageRow>> {
    conn.query_row(
        "SELECT conversation_id, sequence, sender_id, text, created_at, status
         FROM messages WHERE conversation_id = ?1 AND sequence = ?2",
        params![conversation_id, sequence as i64],
        message_from_row,
    )
    .optional()
}

pub fn query_messages_after(
    conn: &Connection,
    conversation_id: &str,
    after: u64,
    limit: u32,
) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT conversation_id, sequence, sender_id, text, created_at, status
         FROM messages
         WHERE conversation_id = ?1 AND sequence > ?2
         ORDER BY sequence ASC
         LIMIT ?3",
    )?;

    let rows = stmt
        .query_map(
            params![conversation_id, after.min(i64::MAX as u64) as i64, limit],
            message_from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// The newest `limit` messages, returned in ascending sequence order.
pub fn query_latest_messages(conn: &Connection, conversation_id: &str, limit: u32) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT conversation_id, sequence, sender_id, text, created_at, status
         FROM messages
         WHERE conversation_id = ?1
         ORDER BY sequence DESC
         LIMIT ?2",
    )?;

    let mut rows = stmt
        .query_map(params![conversation_id, limit], message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.reverse();

    Ok(rows)
}

pub fn update_message_status(conn: &Connection, conversation_id: &str, sequence: u64, status: &str) -> Result<()> {
    conn.execute(
        "UPDATE messages SET status = ?3 WHERE conversation_id = ?1 AND sequence = ?2",
        params![conversation_id, sequence as i64, status],
    )?;
    Ok(())
}

/// Flips every message up to `upto` that `reader_id` did not send to `read`.
/// A reader's own messages are left alone. Returns the changed sequences in
/// ascending order.
pub fn advance_read_statuses(conn: &Connection, conversation_id: &str, upto: u64, reader_id: &str) -> Result<Vec<u64>> {
    let mut stmt = conn.prepare(
        "UPDATE messages SET status = 'read'
         WHERE conversation_id = ?1
           AND sequence <= ?2
           AND sender_id != ?3
           AND status != 'read'
         RETURNING sequence",
    )?;
    collect_sequences(&mut stmt, params![conversation_id, upto as i64, reader_id])
}

/// Same as [`advance_read_statuses`] for the delivered watermark; only `sent`
/// messages move.
pub fn advance_delivered_statuses(
    conn: &Connection,
    conversation_id: &str,
    upto: u64,
    recipient_id: &str,
) -> Result<Vec<u64>> {
    let mut stmt = conn.prepare(
        "UPDATE messages SET status = 'delivered'
         WHERE conversation_id = ?1
           AND sequence <= ?2
           AND sender_id != ?3
           AND status = 'sent'
         RETURNING sequence",
    )?;
    collect_sequences(&mut stmt, params![conversation_id, upto as i64, recipient_id])
}

fn collect_sequences(stmt: &mut rusqlite::Statement<'_>, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<u64>> {
    let mut sequences = stmt
        .query_map(params, |row| row.get::<_, i64>(0))?
        .map(|r| r.map(|s| s.max(0) as u64))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    // RETURNING order is unspecified
    sequences.sort_unstable();
    Ok(sequences)
}

// -- Profiles --

pub fn query_profile(conn: &Connection, user_id: &str) -> Result<Option<ProfileRow>> {
    conn.query_row(
        "SELECT id, display_name, about, avatar_url, show_last_seen, read_receipts, last_seen_at, updated_at
         FROM users WHERE id = ?1",
        [user_id],
        |row| {
            Ok(ProfileRow {
                id: row.get(0)?,
                display_name: row.get(1)?,
                about: row.get(2)?,
                avatar_url: row.get(3)?,
                show_last_seen: row.get(4)?,
                read_receipts: row.get(5)?,
                last_seen_at: row.get(6)?,
                updated_at: row.get(7)?,
            })
        },
    )
    .optional()
}

pub fn upsert_profile(conn: &Connection, profile: &ProfileRow) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, display_name, about, avatar_url, show_last_seen, read_receipts, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
             display_name = excluded.display_name,
             about = excluded.about,
             avatar_url = excluded.avatar_url,
             show_last_seen = excluded.show_last_seen,
             read_receipts = excluded.read_receipts,
             updated_at = excluded.updated_at",
        params![
            profile.id,
            profile.display_name,
            profile.about,
            profile.avatar_url,
            profile.show_last_seen,
            profile.read_receipts,
            profile.updated_at
        ],
    )?;
    Ok(())
}

/// Record when the user's last connection closed. Creates a bare profile row
/// for users who never set one up.
pub fn touch_last_seen(conn: &Connection, user_id: &str, at: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, updated_at, last_seen_at) VALUES (?1, ?2, ?2)
         ON CONFLICT(id) DO UPDATE SET last_seen_at = excluded.last_seen_at",
        params![user_id, at],
    )?;
    Ok(())
}

/// Whether the user sends read receipts. Users without a profile do.
pub fn read_receipts_enabled(conn: &Connection, user_id: &str) -> Result<bool> {
    let enabled = conn
        .query_row("SELECT read_receipts FROM users WHERE id = ?1", [user_id], |row| {
            row.get::<_, bool>(0)
        })
        .optional()?;
    Ok(enabled.unwrap_or(true))
}

// -- Row mappers --

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        participant_key: row.get(1)?,
        created_at: row.get(2)?,
        last_sequence: row.get(3)?,
        last_text: row.get(4)?,
        last_sender_id: row.get(5)?,
        last_message_at: row.get(6)?,
    })
}

fn participant_from_row(row: &Row<'_>) -> rusqlite::Result<ParticipantRow> {
    Ok(ParticipantRow {
        conversation_id: row.get(0)?,
        user_id: row.get(1)?,
        unread_count: row.get(2)?,
        read_upto: row.get(3)?,
        delivered_upto: row.get(4)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        conversation_id: row.get(0)?,
        sequence: row.get(1)?,
        sender_id: row.get(2)?,
        text: row.get(3)?,
        created_at: row.get(4)?,
        status: row.get(5)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
