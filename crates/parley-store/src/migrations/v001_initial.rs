//! v001 -- Initial schema creation.
//!
//! Creates the three core tables: `users`, `conversations` and `messages`.
//! Identifiers are hyphenated UUID text, times are epoch milliseconds.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,
    name       TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

-- ----------------------------------------------------------------
-- Conversations (header + payload pointers)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id            TEXT PRIMARY KEY NOT NULL,
    title         TEXT NOT NULL,
    created_at    INTEGER NOT NULL,
    creator_id    TEXT NOT NULL,
    restricted    INTEGER NOT NULL DEFAULT 0,   -- boolean 0/1
    first_message TEXT NOT NULL,                -- nil UUID when empty
    last_message  TEXT NOT NULL,

    FOREIGN KEY (creator_id) REFERENCES users(id)
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,
    conversation_id TEXT NOT NULL,
    author_id       TEXT NOT NULL,
    content         TEXT NOT NULL,
    created_at      INTEGER NOT NULL,
    previous_id     TEXT NOT NULL,
    next_id         TEXT NOT NULL,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts
    ON messages(conversation_id, created_at);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
