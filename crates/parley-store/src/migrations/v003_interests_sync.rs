//! v003 -- Interest sets and relay sync state.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS interest_sets (
    owner_id TEXT PRIMARY KEY NOT NULL,
    body     TEXT NOT NULL                  -- JSON-encoded InterestSet
);

-- Single-row key/value state: relay cursor and snapshot metadata.
CREATE TABLE IF NOT EXISTS sync_state (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
