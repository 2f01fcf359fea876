use anyhow::Result;

use crate::Database;

impl Database {
    pub fn create_session(&self, id: &str, user_id: &str, expires_at: i64, now: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, user_id, expires_at, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, user_id, expires_at, now],
            )?;
            Ok(())
        })
    }

    /// True when the session row exists, belongs to `user_id` and has not expired.
    pub fn session_is_active(&self, id: &str, user_id: &str, now: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sessions WHERE id = ?1 AND user_id = ?2 AND expires_at > ?3",
                rusqlite::params![id, user_id, now],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    pub fn delete_session(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM sessions WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    pub fn delete_user_sessions(&self, user_id: &str) -> Result<usize> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM sessions WHERE user_id = ?1", [user_id])?))
    }

    pub fn purge_expired_sessions(&self, now: i64) -> Result<usize> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", [now])?))
    }
}
