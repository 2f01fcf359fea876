use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use aide_db::models::MemoryRow;
use aide_types::api::{CreateMemoryRequest, DataEnvelope, Memory};

use crate::error::{ApiError, ApiJson};
use crate::middleware::AuthUser;
use crate::state::AppState;
use crate::views;

const MAX_TITLE_LEN: usize = 200;
const MAX_CONTENT_LEN: usize = 10_000;

pub async fn list_memories(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<DataEnvelope<Vec<Memory>>>, ApiError> {
    let rows = state.db.list_memories(&auth.user_id)?;
    Ok(Json(DataEnvelope::new(
        rows.iter().map(|row| views::memory(row, &state.cipher)).collect(),
    )))
}

/// Title and content are encrypted before they reach the database.
pub async fn create_memory(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(req): ApiJson<CreateMemoryRequest>,
) -> Result<(StatusCode, Json<DataEnvelope<Memory>>), ApiError> {
    let title = req.title.trim();
    let content = req.content.trim();
    if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
        return Err(ApiError::validation(format!(
            "Title must be between 1 and {} characters",
            MAX_TITLE_LEN
        )));
    }
    if content.is_empty() || content.chars().count() > MAX_CONTENT_LEN {
        return Err(ApiError::validation(format!(
            "Content must be between 1 and {} characters",
            MAX_CONTENT_LEN
        )));
    }

    let now = Utc::now();
    let row = MemoryRow {
        id: Uuid::new_v4().to_string(),
        user_id: auth.user_id.clone(),
        title: state.cipher.encrypt(title)?,
        content: state.cipher.encrypt(content)?,
        created_at: now,
        updated_at: now,
    };
    state.db.insert_memory(&row)?;

    info!("User {} stored memory {}", auth.user_id, row.id);
    Ok((
        StatusCode::CREATED,
        Json(DataEnvelope::new(Memory {
            id: views::parse_id(&row.id),
            title: title.to_string(),
            content: content.to_string(),
            created_at: now,
            updated_at: now,
        })),
    ))
}

pub async fn delete_memory(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if !state.db.delete_memory(&id, &auth.user_id)? {
        return Err(ApiError::NotFound);
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::test_support::TestApp;

    #[tokio::test]
    async fn stored_encrypted_listed_in_plaintext() {
        let app = TestApp::new();
        let user_id = app.user("60123456789", Some("123456"));
        let cookie = app.session_for(&user_id);

        let res = app
            .post_with_cookie("/api/memories", json!({"title": "Allergy", "content": "Peanuts"}), &cookie)
            .await;
        assert_eq!(res.status, StatusCode::CREATED);
        assert_eq!(res.body["data"]["title"], "Allergy");

        let stored = app.state.db.list_memories(&user_id).unwrap();
        assert_eq!(stored.len(), 1);
        assert_ne!(stored[0].title, "Allergy");
        assert_ne!(stored[0].content, "Peanuts");

        let res = app.get_with_cookie("/api/memories", &cookie).await;
        assert_eq!(res.body["data"][0]["title"], "Allergy");
        assert_eq!(res.body["data"][0]["content"], "Peanuts");
    }

    #[tokio::test]
    async fn undecryptable_rows_are_returned_raw() {
        let app = TestApp::new();
        let user_id = app.user("60123456789", Some("123456"));
        let cookie = app.session_for(&user_id);
        let now = Utc::now();
        app.state
            .db
            .insert_memory(&MemoryRow {
                id: Uuid::new_v4().to_string(),
                user_id: user_id.clone(),
                title: "legacy title".into(),
                content: "legacy content".into(),
                created_at: now,
                updated_at: now,
            })
            .unwrap();

        let res = app.get_with_cookie("/api/memories", &cookie).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["data"][0]["title"], "legacy title");
        assert_eq!(res.body["data"][0]["content"], "legacy content");
    }

    #[tokio::test]
    async fn delete_is_owner_scoped() {
        let app = TestApp::new();
        let owner = app.user("60123456789", Some("123456"));
        let other = app.user("60199999999", Some("123456"));
        let owner_cookie = app.session_for(&owner);
        let other_cookie = app.session_for(&other);

        let res = app
            .post_with_cookie("/api/memories", json!({"title": "Wifi", "content": "hunter2"}), &owner_cookie)
            .await;
        let path = format!("/api/memories/{}", res.body["data"]["id"].as_str().unwrap());

        let res = app.delete_with_cookie(&path, &other_cookie).await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        let res = app.delete_with_cookie(&path, &owner_cookie).await;
        assert_eq!(res.status, StatusCode::NO_CONTENT);
        let res = app.get_with_cookie("/api/memories", &owner_cookie).await;
        assert_eq!(res.body["data"], json!([]));
    }

    #[tokio::test]
    async fn empty_memory_is_rejected() {
        let app = TestApp::new();
        let user_id = app.user("60123456789", Some("123456"));
        let cookie = app.session_for(&user_id);
        let res = app
            .post_with_cookie("/api/memories", json!({"title": "x", "content": "   "}), &cookie)
            .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
    }
}
