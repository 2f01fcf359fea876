use axum::{Extension, Json, extract::State, http::StatusCode};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use aide_db::models::FeedbackRow;
use aide_types::api::{CreateFeedbackRequest, DataEnvelope, Feedback};

use crate::error::{ApiError, ApiJson};
use crate::middleware::AuthUser;
use crate::state::AppState;
use crate::views;

const MAX_MESSAGE_LEN: usize = 5000;
const CATEGORIES: &[&str] = &["general", "bug", "feature", "billing", "other"];

pub async fn submit_feedback(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(req): ApiJson<CreateFeedbackRequest>,
) -> Result<(StatusCode, Json<DataEnvelope<Feedback>>), ApiError> {
    let message = req.message.trim();
    if message.is_empty() || message.chars().count() > MAX_MESSAGE_LEN {
        return Err(ApiError::validation(format!(
            "Message must be between 1 and {} characters",
            MAX_MESSAGE_LEN
        )));
    }
    if req.rating.is_some_and(|r| !(1..=5).contains(&r)) {
        return Err(ApiError::validation("Rating must be between 1 and 5"));
    }
    let category = req
        .category
        .map(|c| c.trim().to_ascii_lowercase())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| "general".to_string());
    if !CATEGORIES.contains(&category.as_str()) {
        return Err(ApiError::validation("Unknown feedback category"));
    }

    let row = FeedbackRow {
        id: Uuid::new_v4().to_string(),
        user_id: auth.user_id.clone(),
        category,
        message: message.to_string(),
        rating: req.rating.map(i64::from),
        created_at: Utc::now(),
    };
    state.db.insert_feedback(&row)?;

    info!("Feedback {} ({}) from user {}", row.id, row.category, auth.user_id);
    Ok((StatusCode::CREATED, Json(DataEnvelope::new(views::feedback(&row)))))
}
