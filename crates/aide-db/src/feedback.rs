use anyhow::Result;

use crate::Database;
use crate::models::FeedbackRow;

impl Database {
    pub fn insert_feedback(&self, feedback: &FeedbackRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO feedback (id, user_id, category, message, rating, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    feedback.id,
                    feedback.user_id,
                    feedback.category,
                    feedback.message,
                    feedback.rating,
                    feedback.created_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn list_feedback(&self, user_id: &str) -> Result<Vec<FeedbackRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, category, message, rating, created_at
                 FROM feedback WHERE user_id = ?1 ORDER BY created_at",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(FeedbackRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        category: row.get(2)?,
                        message: row.get(3)?,
                        rating: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}
