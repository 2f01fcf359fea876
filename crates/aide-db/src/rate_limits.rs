use anyhow::Result;

use crate::Database;

impl Database {
    /// Record one hit for `key` in a sliding window ending at `now_ms`.
    ///
    /// Returns the number of hits inside the window (this one included) and the
    /// timestamp of the oldest of them.
    pub fn record_rate_limit_hit(&self, key: &str, now_ms: i64, window_ms: i64) -> Result<(u64, i64)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM rate_limit_hits WHERE key = ?1 AND hit_at_ms <= ?2",
                rusqlite::params![key, now_ms - window_ms],
            )?;
            tx.execute(
                "INSERT INTO rate_limit_hits (key, hit_at_ms) VALUES (?1, ?2)",
                rusqlite::params![key, now_ms],
            )?;
            let (count, oldest): (i64, i64) = tx.query_row(
                "SELECT COUNT(*), MIN(hit_at_ms) FROM rate_limit_hits WHERE key = ?1",
                [key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            tx.commit()?;
            Ok((count as u64, oldest))
        })
    }

    /// Drop every hit at or before `older_than_ms`, across all keys.
    pub fn purge_rate_limit_hits(&self, older_than_ms: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM rate_limit_hits WHERE hit_at_ms <= ?1", [older_than_ms])?;
            Ok(n)
        })
    }
}
