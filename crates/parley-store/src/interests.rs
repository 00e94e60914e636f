//! Interest sets and the relay sync-state table.
//!
//! Interest set bodies are stored as JSON; they are only ever replaced
//! wholesale, so there is nothing to gain from normalising them.

use parley_shared::Id;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::database::Database;
use crate::error::Result;
use crate::models::InterestSet;

impl Database {
    pub fn insert_interest_set(&self, interests: &InterestSet) -> Result<()> {
        let body = serde_json::to_string(interests)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO interest_sets (owner_id, body) VALUES (?1, ?2)",
            params![interests.owner.to_string(), body],
        )?;
        Ok(())
    }

    pub fn list_interest_sets(&self) -> Result<Vec<InterestSet>> {
        let mut stmt = self.conn().prepare("SELECT body FROM interest_sets")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut sets = Vec::new();
        for row in rows {
            sets.push(serde_json::from_str(&row?)?);
        }
        Ok(sets)
    }

    pub(crate) fn clear_interest_sets(&self) -> Result<()> {
        self.conn().execute("DELETE FROM interest_sets", [])?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sync state
    // ------------------------------------------------------------------

    pub fn set_state(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO sync_state (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn state(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// The stored relay cursor, [`Id::NULL`] if none.
    pub fn cursor(&self) -> Result<Id> {
        match self.state(CURSOR_KEY)? {
            Some(text) => Ok(Id(Uuid::parse_str(&text)?)),
            None => Ok(Id::NULL),
        }
    }
}

pub(crate) const CURSOR_KEY: &str = "relay_cursor";
