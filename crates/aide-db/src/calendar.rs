use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Row;

use crate::models::{CalendarEventRow, ReminderRow};
use crate::{Database, OptionalExt};

const EVENT_COLUMNS: &str = "id, user_id, title, description, start_time, end_time, timezone, \
     all_day, reminder_id, created_at, updated_at";

const REMINDER_COLUMNS: &str = "id, user_id, message, reminder_time, status, created_at";

impl Database {
    // -- Calendar events --

    /// Insert an event, and its linked reminder when given, in one transaction.
    pub fn create_event(&self, event: &CalendarEventRow, reminder: Option<&ReminderRow>) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            if let Some(r) = reminder {
                tx.execute(
                    "INSERT INTO reminders (id, user_id, message, reminder_time, status, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![r.id, r.user_id, r.message, r.reminder_time, r.status, r.created_at],
                )?;
            }
            tx.execute(
                "INSERT INTO calendar_events (id, user_id, title, description, start_time, end_time,
                     timezone, all_day, reminder_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    event.id,
                    event.user_id,
                    event.title,
                    event.description,
                    event.start_time,
                    event.end_time,
                    event.timezone,
                    event.all_day,
                    event.reminder_id,
                    event.created_at,
                    event.updated_at,
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn list_events(&self, user_id: &str) -> Result<Vec<CalendarEventRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {EVENT_COLUMNS} FROM calendar_events WHERE user_id = ?1 ORDER BY start_time"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], event_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Fetch an event only if `user_id` owns it.
    pub fn get_event(&self, id: &str, user_id: &str) -> Result<Option<CalendarEventRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {EVENT_COLUMNS} FROM calendar_events WHERE id = ?1 AND user_id = ?2");
            conn.query_row(&sql, [id, user_id], event_from_row).optional()
        })
    }

    /// Persist every mutable field of `event`. When `reminder_time` is given the
    /// linked reminder is moved in the same transaction.
    pub fn update_event(&self, event: &CalendarEventRow, reminder_time: Option<DateTime<Utc>>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE calendar_events SET title = ?3, description = ?4, start_time = ?5, end_time = ?6,
                     timezone = ?7, all_day = ?8, updated_at = ?9
                 WHERE id = ?1 AND user_id = ?2",
                rusqlite::params![
                    event.id,
                    event.user_id,
                    event.title,
                    event.description,
                    event.start_time,
                    event.end_time,
                    event.timezone,
                    event.all_day,
                    event.updated_at,
                ],
            )?;

            if let (Some(time), Some(reminder_id)) = (reminder_time, event.reminder_id.as_deref()) {
                tx.execute(
                    "UPDATE reminders SET reminder_time = ?3 WHERE id = ?1 AND user_id = ?2",
                    rusqlite::params![reminder_id, event.user_id, time],
                )?;
            }

            tx.commit()?;
            Ok(changed > 0)
        })
    }

    /// Delete an owned event together with its linked reminder.
    pub fn delete_event(&self, id: &str, user_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let reminder_id: Option<Option<String>> = tx
                .query_row(
                    "SELECT reminder_id FROM calendar_events WHERE id = ?1 AND user_id = ?2",
                    [id, user_id],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(reminder_id) = reminder_id else {
                return Ok(false);
            };

            tx.execute(
                "DELETE FROM calendar_events WHERE id = ?1 AND user_id = ?2",
                [id, user_id],
            )?;
            if let Some(rid) = reminder_id {
                tx.execute(
                    "DELETE FROM reminders WHERE id = ?1 AND user_id = ?2",
                    [rid.as_str(), user_id],
                )?;
            }
            tx.commit()?;
            Ok(true)
        })
    }

    // -- Reminders --

    pub fn list_reminders(&self, user_id: &str) -> Result<Vec<ReminderRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {REMINDER_COLUMNS} FROM reminders WHERE user_id = ?1 ORDER BY reminder_time"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], reminder_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_reminder(&self, id: &str, user_id: &str) -> Result<Option<ReminderRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = ?1 AND user_id = ?2");
            conn.query_row(&sql, [id, user_id], reminder_from_row).optional()
        })
    }
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<CalendarEventRow> {
    Ok(CalendarEventRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        start_time: row.get(4)?,
        end_time: row.get(5)?,
        timezone: row.get(6)?,
        all_day: row.get(7)?,
        reminder_id: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn reminder_from_row(row: &Row<'_>) -> rusqlite::Result<ReminderRow> {
    Ok(ReminderRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        message: row.get(2)?,
        reminder_time: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
    })
}
