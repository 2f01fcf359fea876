use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::models::VoteOutcome;
use crate::{Database, OptionalExt};

impl Database {
    pub fn get_user_votes(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT integration_id FROM integration_votes WHERE user_id = ?1 ORDER BY created_at",
            )?;
            let rows = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(rows)
        })
    }

    /// Toggle a vote: removes it if held, otherwise adds it unless the user
    /// already holds `max_votes`. The vote row and the denormalized count are
    /// committed together or not at all.
    pub fn toggle_vote(
        &self,
        user_id: &str,
        integration_id: &str,
        max_votes: u32,
        now: DateTime<Utc>,
    ) -> Result<VoteOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let existing: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM integration_votes WHERE user_id = ?1 AND integration_id = ?2",
                    [user_id, integration_id],
                    |row| row.get(0),
                )
                .optional()?;

            let held: u32 = tx.query_row(
                "SELECT COUNT(*) FROM integration_votes WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )?;

            let outcome = if existing.is_some() {
                tx.execute(
                    "DELETE FROM integration_votes WHERE user_id = ?1 AND integration_id = ?2",
                    [user_id, integration_id],
                )?;
                tx.execute(
                    "UPDATE integration_vote_counts SET count = MAX(count - 1, 0) WHERE integration_id = ?1",
                    [integration_id],
                )?;
                VoteOutcome::Removed {
                    count: read_count(&tx, integration_id)?,
                    held: held.saturating_sub(1),
                }
            } else {
                if held >= max_votes {
                    return Ok(VoteOutcome::LimitReached);
                }

                tx.execute(
                    "INSERT INTO integration_votes (user_id, integration_id, created_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![user_id, integration_id, now],
                )?;
                tx.execute(
                    "INSERT INTO integration_vote_counts (integration_id, count) VALUES (?1, 1)
                     ON CONFLICT(integration_id) DO UPDATE SET count = count + 1",
                    [integration_id],
                )?;
                VoteOutcome::Added {
                    count: read_count(&tx, integration_id)?,
                    held: held + 1,
                }
            };

            tx.commit()?;
            Ok(outcome)
        })
    }

    pub fn vote_count(&self, integration_id: &str) -> Result<u32> {
        self.with_conn(|conn| read_count(conn, integration_id))
    }

    pub fn vote_counts(&self) -> Result<HashMap<String, u32>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT integration_id, count FROM integration_vote_counts")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)))?
                .collect::<std::result::Result<HashMap<_, _>, _>>()?;
            Ok(rows)
        })
    }
}

fn read_count(conn: &Connection, integration_id: &str) -> Result<u32> {
    let count: Option<u32> = conn
        .query_row(
            "SELECT count FROM integration_vote_counts WHERE integration_id = ?1",
            [integration_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(count.unwrap_or(0))
}
