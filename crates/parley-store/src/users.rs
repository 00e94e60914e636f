use rusqlite::params;

use crate::database::{id_column, time_column, Database};
use crate::error::{Result, StoreError};
use crate::models::User;

impl Database {
    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![user.id.to_string(), user.name, user.creation.as_millis()],
        )?;
        Ok(())
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id, name, created_at FROM users ORDER BY id ASC")?;
        let rows = stmt.query_map([], row_to_user)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    pub(crate) fn clear_users(&self) -> Result<()> {
        self.conn().execute("DELETE FROM users", [])?;
        Ok(())
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: id_column(row, 0)?,
        name: row.get(1)?,
        creation: time_column(row, 2)?,
    })
}
