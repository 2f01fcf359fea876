use anyhow::Result;

use crate::Database;
use crate::models::MemoryRow;

impl Database {
    pub fn insert_memory(&self, memory: &MemoryRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO memories (id, user_id, title, content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    memory.id,
                    memory.user_id,
                    memory.title,
                    memory.content,
                    memory.created_at,
                    memory.updated_at,
                ],
            )?;
            Ok(())
        })
    }

    /// Newest first.
    pub fn list_memories(&self, user_id: &str) -> Result<Vec<MemoryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, title, content, created_at, updated_at
                 FROM memories WHERE user_id = ?1 ORDER BY created_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(MemoryRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        title: row.get(2)?,
                        content: row.get(3)?,
                        created_at: row.get(4)?,
                        updated_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_memory(&self, id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM memories WHERE id = ?1 AND user_id = ?2",
                [id, user_id],
            )?;
            Ok(deleted > 0)
        })
    }
}
