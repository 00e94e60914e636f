//! Persistence of [`ConversationHeader`] records, their role sets and their
//! [`ConversationPayload`] pointers.

use std::collections::{BTreeSet, HashMap};

use parley_shared::Id;
use rusqlite::params;

use crate::database::{id_column, time_column, Database};
use crate::error::Result;
use crate::models::{ConversationHeader, ConversationPayload};

const ROLE_OWNER: &str = "owner";
const ROLE_MEMBER: &str = "member";

impl Database {
    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Insert a conversation header together with its payload pointers and
    /// one row per owner and member.
    pub fn insert_conversation(
        &self,
        header: &ConversationHeader,
        payload: &ConversationPayload,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO conversations
                (id, title, created_at, creator_id, restricted, first_message, last_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                header.id.to_string(),
                header.title,
                header.creation.as_millis(),
                header.creator.to_string(),
                header.restricted,
                payload.first_message.to_string(),
                payload.last_message.to_string(),
            ],
        )?;

        let mut role = self.conn().prepare(
            "INSERT INTO conversation_roles (conversation_id, user_id, role)
             VALUES (?1, ?2, ?3)",
        )?;
        for owner in &header.owners {
            role.execute(params![header.id.to_string(), owner.to_string(), ROLE_OWNER])?;
        }
        for member in &header.members {
            role.execute(params![header.id.to_string(), member.to_string(), ROLE_MEMBER])?;
        }
        Ok(())
    }

    // ON DELETE CASCADE: roles + messages go with it
    pub(crate) fn clear_conversations(&self) -> Result<()> {
        self.conn().execute("DELETE FROM conversations", [])?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// All conversations with their role sets filled in, plus payloads.
    pub fn list_conversations(&self) -> Result<(Vec<ConversationHeader>, Vec<ConversationPayload>)> {
        let mut roles: HashMap<Id, (BTreeSet<Id>, BTreeSet<Id>)> = HashMap::new();
        {
            let mut stmt = self
                .conn()
                .prepare("SELECT conversation_id, user_id, role FROM conversation_roles")?;
            let rows = stmt.query_map([], |row| {
                Ok((id_column(row, 0)?, id_column(row, 1)?, row.get::<_, String>(2)?))
            })?;
            for row in rows {
                let (conversation, user, role) = row?;
                let entry = roles.entry(conversation).or_default();
                match role.as_str() {
                    ROLE_OWNER => entry.0.insert(user),
                    _ => entry.1.insert(user),
                };
            }
        }

        let mut stmt = self.conn().prepare(
            "SELECT id, title, created_at, creator_id, restricted, first_message, last_message
             FROM conversations
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], row_to_conversation)?;

        let mut headers = Vec::new();
        let mut payloads = Vec::new();
        for row in rows {
            let (mut header, payload) = row?;
            if let Some((owners, members)) = roles.remove(&header.id) {
                header.owners = owners;
                header.members = members;
            }
            headers.push(header);
            payloads.push(payload);
        }
        Ok((headers, payloads))
    }
}

/// Map a row to a header with empty role sets and its payload.
fn row_to_conversation(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<(ConversationHeader, ConversationPayload)> {
    let id = id_column(row, 0)?;
    let header = ConversationHeader {
        id,
        title: row.get(1)?,
        creation: time_column(row, 2)?,
        creator: id_column(row, 3)?,
        owners: BTreeSet::new(),
        members: BTreeSet::new(),
        restricted: row.get(4)?,
    };
    let payload = ConversationPayload {
        id,
        first_message: id_column(row, 5)?,
        last_message: id_column(row, 6)?,
    };
    Ok((header, payload))
}
