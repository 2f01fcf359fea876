use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};

use crate::models::UserRow;
use crate::{Database, OptionalExt};

const USER_COLUMNS: &str =
    "id, phone_hash, pin_hash, name, email, persona, created_at, updated_at";

impl Database {
    pub fn create_user(&self, user: &UserRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, phone_hash, pin_hash, name, email, persona, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    user.id,
                    user.phone_hash,
                    user.pin_hash,
                    user.name,
                    user.email,
                    user.persona,
                    user.created_at,
                    user.updated_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_phone_hash(&self, phone_hash: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "phone_hash", phone_hash))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn set_pin_hash(&self, id: &str, pin_hash: &str, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET pin_hash = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id, pin_hash, now],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn update_profile(
        &self,
        id: &str,
        name: Option<&str>,
        email: Option<&str>,
        persona: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET name = ?2, email = ?3, persona = ?4, updated_at = ?5 WHERE id = ?1",
                rusqlite::params![id, name, email, persona, now],
            )?;
            Ok(changed > 0)
        })
    }

    /// Delete a user and everything they own.
    ///
    /// Vote counts are denormalized, so the user's votes are released first in
    /// the same transaction; the remaining rows go through ON DELETE CASCADE.
    pub fn delete_user(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE integration_vote_counts SET count = MAX(count - 1, 0)
                 WHERE integration_id IN (SELECT integration_id FROM integration_votes WHERE user_id = ?1)",
                [id],
            )?;
            let deleted = tx.execute("DELETE FROM users WHERE id = ?1", [id])?;
            tx.commit()?;
            Ok(deleted > 0)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1 LIMIT 1");
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row([value], user_from_row).optional()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        phone_hash: row.get(1)?,
        pin_hash: row.get(2)?,
        name: row.get(3)?,
        email: row.get(4)?,
        persona: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}
