//! Row → API model conversions.

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use aide_crypto::encrypt::FieldCipher;
use aide_db::models::{CalendarEventRow, FeedbackRow, MemoryRow, ReminderRow, SubscriptionRow, UserRow};
use aide_types::api::{
    CalendarEvent, Feedback, Memory, Reminder, SubscriptionView, UserProfile, UserSummary,
};
use aide_types::models::{Persona, ReminderStatus, SubscriptionStatus};

use crate::config::StripeConfig;
use crate::plans::plan_label;

pub fn parse_id(raw: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt id '{}': {}", raw, e);
        Uuid::default()
    })
}

pub fn user_summary(row: &UserRow) -> UserSummary {
    UserSummary {
        id: parse_id(&row.id),
        name: row.name.clone(),
        email: row.email.clone(),
    }
}

pub fn user_profile(row: &UserRow) -> UserProfile {
    UserProfile {
        id: parse_id(&row.id),
        name: row.name.clone(),
        email: row.email.clone(),
        persona: row.persona.parse().unwrap_or_else(|e| {
            warn!("User {}: {}", row.id, e);
            Persona::Friendly
        }),
        has_pin: row.pin_hash.is_some(),
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

pub fn calendar_event(row: &CalendarEventRow) -> CalendarEvent {
    CalendarEvent {
        id: parse_id(&row.id),
        title: row.title.clone(),
        description: row.description.clone(),
        start_time: row.start_time,
        end_time: row.end_time,
        timezone: row.timezone.clone(),
        all_day: row.all_day,
        reminder_id: row.reminder_id.as_deref().map(parse_id),
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

pub fn reminder(row: &ReminderRow) -> Reminder {
    Reminder {
        id: parse_id(&row.id),
        message: row.message.clone(),
        reminder_time: row.reminder_time,
        status: row.status.parse().unwrap_or_else(|e| {
            warn!("Reminder {}: {}", row.id, e);
            ReminderStatus::Pending
        }),
        created_at: row.created_at,
    }
}

/// Decrypt a stored memory. Fields that fail to decrypt are returned as stored
/// so one bad row never breaks a listing.
pub fn memory(row: &MemoryRow, cipher: &FieldCipher) -> Memory {
    Memory {
        id: parse_id(&row.id),
        title: cipher.decrypt_or_raw(&row.title),
        content: cipher.decrypt_or_raw(&row.content),
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

pub fn feedback(row: &FeedbackRow) -> Feedback {
    Feedback {
        id: parse_id(&row.id),
        category: row.category.clone(),
        message: row.message.clone(),
        rating: row.rating.and_then(|r| u8::try_from(r).ok()),
        created_at: row.created_at,
    }
}

pub fn subscription_view(row: &SubscriptionRow, stripe: &StripeConfig) -> SubscriptionView {
    let stored = row.status.parse().unwrap_or_else(|e| {
        warn!("Subscription {}: {}", row.id, e);
        SubscriptionStatus::Incomplete
    });
    let (status, cancel_at_period_end) = stored.display();

    SubscriptionView {
        plan: plan_label(stripe, row.stripe_price_id.as_deref()).to_string(),
        status,
        cancel_at_period_end,
        current_period_end: row.current_period_end.and_then(unix_to_datetime),
        price_id: row.stripe_price_id.clone(),
    }
}

pub fn unix_to_datetime(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}
