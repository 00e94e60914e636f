use rusqlite::params;

use crate::database::{id_column, time_column, Database};
use crate::error::{Result, StoreError};
use crate::models::Message;

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages
                (id, conversation_id, author_id, content, created_at, previous_id, next_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.id.to_string(),
                message.conversation.to_string(),
                message.author.to_string(),
                message.content,
                message.creation.as_millis(),
                message.previous.to_string(),
                message.next.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Every stored message, oldest first within each conversation.
    pub fn list_messages(&self) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, conversation_id, author_id, content, created_at, previous_id, next_id
             FROM messages
             ORDER BY conversation_id, created_at, id",
        )?;
        let rows = stmt.query_map([], row_to_message)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: id_column(row, 0)?,
        conversation: id_column(row, 1)?,
        author: id_column(row, 2)?,
        content: row.get(3)?,
        creation: time_column(row, 4)?,
        previous: id_column(row, 5)?,
        next: id_column(row, 6)?,
    })
}
