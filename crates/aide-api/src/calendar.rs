use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{Duration, Utc};
use tracing::info;
use uuid::Uuid;

use aide_db::models::{CalendarEventRow, ReminderRow};
use aide_types::api::{CalendarEvent, CreateEventRequest, DataEnvelope, Reminder, UpdateEventRequest};
use aide_types::models::ReminderStatus;

use crate::error::{ApiError, ApiJson};
use crate::middleware::AuthUser;
use crate::state::AppState;
use crate::views;

/// A linked reminder fires this long before the event starts.
pub const REMINDER_LEAD_MINUTES: i64 = 30;
const MAX_TITLE_LEN: usize = 200;
const MAX_DESCRIPTION_LEN: usize = 5000;

pub async fn list_events(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<DataEnvelope<Vec<CalendarEvent>>>, ApiError> {
    let events = state.db.list_events(&auth.user_id)?;
    Ok(Json(DataEnvelope::new(events.iter().map(views::calendar_event).collect())))
}

pub async fn create_event(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(req): ApiJson<CreateEventRequest>,
) -> Result<(StatusCode, Json<DataEnvelope<CalendarEvent>>), ApiError> {
    let title = validate_title(&req.title)?;
    let description = validate_description(req.description)?;
    if req.end_time.is_some_and(|end| end < req.start_time) {
        return Err(ApiError::validation("End time must not be before start time"));
    }

    let now = Utc::now();
    let reminder = req.reminder.then(|| ReminderRow {
        id: Uuid::new_v4().to_string(),
        user_id: auth.user_id.clone(),
        message: format!("Upcoming: {}", title),
        reminder_time: req.start_time - Duration::minutes(REMINDER_LEAD_MINUTES),
        status: ReminderStatus::Pending.as_str().to_string(),
        created_at: now,
    });

    let event = CalendarEventRow {
        id: Uuid::new_v4().to_string(),
        user_id: auth.user_id.clone(),
        title,
        description,
        start_time: req.start_time,
        end_time: req.end_time,
        timezone: req
            .timezone
            .map(|tz| tz.trim().to_string())
            .filter(|tz| !tz.is_empty())
            .unwrap_or_else(|| "UTC".to_string()),
        all_day: req.all_day,
        reminder_id: reminder.as_ref().map(|r| r.id.clone()),
        created_at: now,
        updated_at: now,
    };
    state.db.create_event(&event, reminder.as_ref())?;

    info!("User {} created event {}", auth.user_id, event.id);
    Ok((StatusCode::CREATED, Json(DataEnvelope::new(views::calendar_event(&event)))))
}

/// Partial update. Only a change of start time moves the linked reminder.
pub async fn update_event(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateEventRequest>,
) -> Result<Json<DataEnvelope<CalendarEvent>>, ApiError> {
    let mut event = state
        .db
        .get_event(&id, &auth.user_id)?
        .ok_or(ApiError::NotFound)?;

    if let Some(title) = req.title {
        event.title = validate_title(&title)?;
    }
    if req.description.is_some() {
        event.description = validate_description(req.description)?;
    }
    if let Some(tz) = req.timezone.map(|tz| tz.trim().to_string()).filter(|tz| !tz.is_empty()) {
        event.timezone = tz;
    }
    if let Some(all_day) = req.all_day {
        event.all_day = all_day;
    }
    if let Some(end) = req.end_time {
        event.end_time = Some(end);
    }

    let start_changed = req.start_time.is_some_and(|start| start != event.start_time);
    if let Some(start) = req.start_time {
        event.start_time = start;
    }

    if event.end_time.is_some_and(|end| end < event.start_time) {
        return Err(ApiError::validation("End time must not be before start time"));
    }

    let reminder_time = (start_changed && event.reminder_id.is_some())
        .then(|| event.start_time - Duration::minutes(REMINDER_LEAD_MINUTES));
    event.updated_at = Utc::now();

    if !state.db.update_event(&event, reminder_time)? {
        return Err(ApiError::NotFound);
    }
    Ok(Json(DataEnvelope::new(views::calendar_event(&event))))
}

pub async fn delete_event(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if !state.db.delete_event(&id, &auth.user_id)? {
        return Err(ApiError::NotFound);
    }
    info!("User {} deleted event {}", auth.user_id, id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_reminders(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<DataEnvelope<Vec<Reminder>>>, ApiError> {
    let reminders = state.db.list_reminders(&auth.user_id)?;
    Ok(Json(DataEnvelope::new(reminders.iter().map(views::reminder).collect())))
}

fn validate_title(title: &str) -> Result<String, ApiError> {
    let title = title.trim();
    if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
        return Err(ApiError::validation(format!(
            "Title must be between 1 and {} characters",
            MAX_TITLE_LEN
        )));
    }
    Ok(title.to_string())
}

fn validate_description(description: Option<String>) -> Result<Option<String>, ApiError> {
    match description {
        Some(d) if d.chars().count() > MAX_DESCRIPTION_LEN => Err(ApiError::validation(format!(
            "Description must be at most {} characters",
            MAX_DESCRIPTION_LEN
        ))),
        Some(d) if d.trim().is_empty() => Ok(None),
        other => Ok(other),
    }
}
