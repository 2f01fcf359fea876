use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Row;

use crate::models::SubscriptionRow;
use crate::{Database, OptionalExt};

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, email, stripe_customer_id, stripe_subscription_id, \
     stripe_price_id, status, current_period_end, status_updated_at, created_at, updated_at";

/// Remote state to mirror into the local row.
#[derive(Debug, Clone)]
pub struct SubscriptionSync<'a> {
    pub stripe_subscription_id: &'a str,
    pub stripe_price_id: Option<&'a str>,
    pub status: &'a str,
    pub current_period_end: Option<i64>,
    pub version: i64,
}

impl Database {
    pub fn get_subscription_by_user(&self, user_id: &str) -> Result<Option<SubscriptionRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = ?1");
            conn.query_row(&sql, [user_id], subscription_from_row).optional()
        })
    }

    pub fn get_subscription_by_stripe_id(&self, stripe_subscription_id: &str) -> Result<Option<SubscriptionRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE stripe_subscription_id = ?1"
            );
            conn.query_row(&sql, [stripe_subscription_id], subscription_from_row)
                .optional()
        })
    }

    /// Known billing customer for an email, either on a subscription or on its owner.
    pub fn find_customer_id_by_email(&self, email: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT s.stripe_customer_id FROM subscriptions s
                 LEFT JOIN users u ON u.id = s.user_id
                 WHERE s.stripe_customer_id IS NOT NULL AND (s.email = ?1 OR u.email = ?1)
                 ORDER BY s.updated_at DESC LIMIT 1",
                [email],
                |row| row.get(0),
            )
            .optional()
        })
    }

    /// Insert or replace the user's subscription from a completed checkout.
    /// Returns false when the stored row carries a newer version.
    pub fn upsert_subscription(
        &self,
        user_id: &str,
        email: Option<&str>,
        stripe_customer_id: &str,
        sync: &SubscriptionSync<'_>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let id = format!("sub_{}", user_id);
            let changed = conn.execute(
                "INSERT INTO subscriptions (id, user_id, email, stripe_customer_id, stripe_subscription_id,
                     stripe_price_id, status, current_period_end, status_updated_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
                 ON CONFLICT(user_id) DO UPDATE SET
                     email = COALESCE(excluded.email, subscriptions.email),
                     stripe_customer_id = excluded.stripe_customer_id,
                     stripe_subscription_id = excluded.stripe_subscription_id,
                     stripe_price_id = COALESCE(excluded.stripe_price_id, subscriptions.stripe_price_id),
                     status = excluded.status,
                     current_period_end = COALESCE(excluded.current_period_end, subscriptions.current_period_end),
                     status_updated_at = excluded.status_updated_at,
                     updated_at = excluded.updated_at
                 WHERE excluded.status_updated_at >= subscriptions.status_updated_at",
                rusqlite::params![
                    id,
                    user_id,
                    email,
                    stripe_customer_id,
                    sync.stripe_subscription_id,
                    sync.stripe_price_id,
                    sync.status,
                    sync.current_period_end,
                    sync.version,
                    now,
                ],
            )?;
            Ok(changed > 0)
        })
    }

    /// Mirror remote state onto the row that tracks `stripe_subscription_id`.
    /// Stale versions are ignored; returns whether a row changed.
    pub fn sync_subscription(&self, sync: &SubscriptionSync<'_>, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE subscriptions SET
                     status = ?2,
                     stripe_price_id = COALESCE(?3, stripe_price_id),
                     current_period_end = COALESCE(?4, current_period_end),
                     status_updated_at = ?5,
                     updated_at = ?6
                 WHERE stripe_subscription_id = ?1 AND status_updated_at <= ?5",
                rusqlite::params![
                    sync.stripe_subscription_id,
                    sync.status,
                    sync.stripe_price_id,
                    sync.current_period_end,
                    sync.version,
                    now,
                ],
            )?;
            Ok(changed > 0)
        })
    }

    /// Optimistic local status write, same last-writer-wins rule as the webhook.
    pub fn set_subscription_status(
        &self,
        user_id: &str,
        status: &str,
        current_period_end: Option<i64>,
        version: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE subscriptions SET
                     status = ?2,
                     current_period_end = COALESCE(?3, current_period_end),
                     status_updated_at = ?4,
                     updated_at = ?5
                 WHERE user_id = ?1 AND status_updated_at <= ?4",
                rusqlite::params![user_id, status, current_period_end, version, now],
            )?;
            Ok(changed > 0)
        })
    }
}

fn subscription_from_row(row: &Row<'_>) -> rusqlite::Result<SubscriptionRow> {
    Ok(SubscriptionRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        email: row.get(2)?,
        stripe_customer_id: row.get(3)?,
        stripe_subscription_id: row.get(4)?,
        stripe_price_id: row.get(5)?,
        status: row.get(6)?,
        current_period_end: row.get(7)?,
        status_updated_at: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}
