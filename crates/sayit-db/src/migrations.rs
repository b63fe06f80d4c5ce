use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub const LATEST_VERSION: i64 = 3;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (conversations, participants, messages)");
        conn.execute_batch(
            "
            CREATE TABLE conversations (
                id              TEXT PRIMARY KEY,
                participant_key TEXT NOT NULL UNIQUE,
                created_at      TEXT NOT NULL,
                last_sequence   INTEGER NOT NULL DEFAULT 0,
                last_text       TEXT,
                last_sender_id  TEXT,
                last_message_at TEXT
            );

            CREATE TABLE participants (
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                user_id         TEXT NOT NULL,
                unread_count    INTEGER NOT NULL DEFAULT 0,
                read_upto       INTEGER NOT NULL DEFAULT 0,
                delivered_upto  INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (conversation_id, user_id)
            );

            CREATE INDEX idx_participants_user
                ON participants(user_id);

            -- (conversation_id, sequence) is the message identity; the primary key
            -- makes a double-assigned sequence fail loudly instead of overwriting.
            CREATE TABLE messages (
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                sequence        INTEGER NOT NULL,
                sender_id       TEXT NOT NULL,
                text            TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                status          TEXT NOT NULL DEFAULT 'sent',
                PRIMARY KEY (conversation_id, sequence)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (user profiles)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id           TEXT PRIMARY KEY,
                display_name TEXT NOT NULL DEFAULT '',
                about        TEXT NOT NULL DEFAULT '',
                avatar_url   TEXT,
                updated_at   TEXT NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    if version < 3 {
        info!("Running migration v3 (privacy settings, last seen)");
        conn.execute_batch(
            "
            ALTER TABLE users ADD COLUMN show_last_seen INTEGER NOT NULL DEFAULT 1;
            ALTER TABLE users ADD COLUMN read_receipts  INTEGER NOT NULL DEFAULT 1;
            ALTER TABLE users ADD COLUMN last_seen_at   TEXT;

            INSERT INTO schema_version (version) VALUES (3);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
