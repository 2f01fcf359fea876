//! Database row types. These map directly to SQLite rows.
//! Distinct from aide-types API models to keep the DB layer independent.
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub phone_hash: String,
    pub pin_hash: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub persona: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `status_updated_at` is the last-writer-wins version (unix seconds) shared by
/// the optimistic cancel write and the webhook.
#[derive(Debug, Clone)]
pub struct SubscriptionRow {
    pub id: String,
    pub user_id: String,
    pub email: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub stripe_price_id: Option<String>,
    pub status: String,
    pub current_period_end: Option<i64>,
    pub status_updated_at: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CalendarEventRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub timezone: String,
    pub all_day: bool,
    pub reminder_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ReminderRow {
    pub id: String,
    pub user_id: String,
    pub message: String,
    pub reminder_time: DateTime<Utc>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Title and content hold ciphertext; the API layer decrypts.
#[derive(Debug, Clone)]
pub struct MemoryRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FeedbackRow {
    pub id: String,
    pub user_id: String,
    pub category: String,
    pub message: String,
    pub rating: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Result of toggling an integration vote. `count` is the integration's total,
/// `held` the number of votes the user holds after the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Added { count: u32, held: u32 },
    Removed { count: u32, held: u32 },
    LimitReached,
}
