use axum::{
    Extension, Json,
    extract::State,
    http::header,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::{info, warn};

use aide_crypto::hash::{constant_time_eq, hash_pin};
use aide_types::api::{
    DataEnvelope, SetPinRequest, SuccessResponse, UpdateProfileRequest, UserExport, UserProfile,
};
use aide_types::models::{Persona, SubscriptionStatus};

use crate::auth::normalize_email;
use crate::error::{ApiError, ApiJson};
use crate::middleware::AuthUser;
use crate::phone::is_valid_pin;
use crate::session::clear_session_cookie;
use crate::state::AppState;
use crate::stripe::pick_cancellable;
use crate::views;

const MAX_NAME_LEN: usize = 100;
pub const EXPORT_FILENAME: &str = "aide-export.json";

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<DataEnvelope<UserProfile>>, ApiError> {
    let user = state.db.get_user_by_id(&auth.user_id)?.ok_or(ApiError::NotFound)?;
    Ok(Json(DataEnvelope::new(views::user_profile(&user))))
}

/// Absent fields are kept; an empty name or email clears it.
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(req): ApiJson<UpdateProfileRequest>,
) -> Result<Json<DataEnvelope<UserProfile>>, ApiError> {
    let mut user = state.db.get_user_by_id(&auth.user_id)?.ok_or(ApiError::NotFound)?;

    if let Some(name) = req.name {
        let name = name.trim();
        if name.chars().count() > MAX_NAME_LEN {
            return Err(ApiError::validation(format!(
                "Name must be at most {} characters",
                MAX_NAME_LEN
            )));
        }
        user.name = (!name.is_empty()).then(|| name.to_string());
    }
    if let Some(email) = req.email {
        user.email = normalize_email(Some(&email))?;
    }
    if let Some(persona) = req.persona {
        let persona: Persona = persona.trim().parse().map_err(ApiError::Validation)?;
        user.persona = persona.as_str().to_string();
    }

    user.updated_at = Utc::now();
    if !state.db.update_profile(
        &user.id,
        user.name.as_deref(),
        user.email.as_deref(),
        &user.persona,
        user.updated_at,
    )? {
        return Err(ApiError::NotFound);
    }

    Ok(Json(DataEnvelope::new(views::user_profile(&user))))
}

/// Set a first PIN, or change it when the current one is supplied.
pub async fn set_pin(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(req): ApiJson<SetPinRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    if !is_valid_pin(&req.new_pin) {
        return Err(ApiError::validation("PIN must be exactly 6 digits"));
    }
    let user = state.db.get_user_by_id(&auth.user_id)?.ok_or(ApiError::NotFound)?;
    let pepper = &state.config.hash_pepper;

    if let Some(stored) = user.pin_hash.as_deref() {
        let current = req
            .current_pin
            .as_deref()
            .ok_or_else(|| ApiError::validation("Current PIN is required"))?;
        if !constant_time_eq(stored, &hash_pin(pepper, current)) {
            return Err(ApiError::Forbidden("Current PIN is incorrect".into()));
        }
    }

    state
        .db
        .set_pin_hash(&user.id, &hash_pin(pepper, &req.new_pin), Utc::now())?;
    info!("User {} updated their PIN", user.id);

    Ok(Json(SuccessResponse {
        success: true,
        message: "PIN updated".into(),
    }))
}

/// Delete the account and everything it owns, then clear the cookie. A live
/// subscription is cancelled at period end first, best effort.
pub async fn delete_account(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(subscription) = state.db.get_subscription_by_user(&auth.user_id)? {
        let live = subscription
            .status
            .parse::<SubscriptionStatus>()
            .is_ok_and(|s| !s.is_cancelled_or_pending());
        if let (true, Some(customer)) = (live, subscription.stripe_customer_id.as_deref()) {
            if let Err(e) = cancel_remote(&state, customer).await {
                warn!("Could not cancel billing for deleted user {}: {:#}", auth.user_id, e);
            }
        }
    }

    if !state.db.delete_user(&auth.user_id)? {
        return Err(ApiError::NotFound);
    }
    info!("Deleted account {}", auth.user_id);

    Ok((
        [(header::SET_COOKIE, clear_session_cookie(state.config.production))],
        Json(SuccessResponse {
            success: true,
            message: "Account deleted".into(),
        }),
    ))
}

async fn cancel_remote(state: &AppState, customer_id: &str) -> anyhow::Result<()> {
    let remote = state.billing.list_subscriptions(customer_id).await?;
    if let Some(target) = pick_cancellable(&remote) {
        state.billing.cancel_at_period_end(&target.id).await?;
    }
    Ok(())
}

pub async fn export_data(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.db.get_user_by_id(&auth.user_id)?.ok_or(ApiError::NotFound)?;

    let export = UserExport {
        exported_at: Utc::now(),
        profile: views::user_profile(&user),
        calendar_events: state
            .db
            .list_events(&user.id)?
            .iter()
            .map(views::calendar_event)
            .collect(),
        reminders: state.db.list_reminders(&user.id)?.iter().map(views::reminder).collect(),
        memories: state
            .db
            .list_memories(&user.id)?
            .iter()
            .map(|row| views::memory(row, &state.cipher))
            .collect(),
        feedback: state.db.list_feedback(&user.id)?.iter().map(views::feedback).collect(),
        integration_votes: state.db.get_user_votes(&user.id)?,
        subscription: state
            .db
            .get_subscription_by_user(&user.id)?
            .map(|row| views::subscription_view(&row, &state.config.stripe)),
    };

    info!("User {} exported their data", user.id);
    Ok((
        [(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", EXPORT_FILENAME),
        )],
        Json(export),
    ))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::test_support::TestApp;

    #[tokio::test]
    async fn profile_round_trip() {
        let app = TestApp::new();
        let user_id = app.user("60123456789", Some("123456"));
        let cookie = app.session_for(&user_id);

        let res = app.get_with_cookie("/api/user/profile", &cookie).await;
        assert_eq!(res.body["data"]["id"], user_id);
        assert_eq!(res.body["data"]["persona"], "friendly");
        assert_eq!(res.body["data"]["hasPin"], true);

        let res = app
            .patch_with_cookie(
                "/api/user/profile",
                json!({"name": "Mei", "persona": "concise", "email": ""}),
                &cookie,
            )
            .await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["data"]["name"], "Mei");
        assert_eq!(res.body["data"]["persona"], "concise");
        assert_eq!(res.body["data"]["email"], serde_json::Value::Null);

        let res = app.get_with_cookie("/api/user/profile", &cookie).await;
        assert_eq!(res.body["data"]["name"], "Mei");

        let res = app
            .patch_with_cookie("/api/user/profile", json!({"persona": "grumpy"}), &cookie)
            .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn change_pin_requires_current() {
        let app = TestApp::new();
        let user_id = app.user("60123456789", Some("123456"));
        let cookie = app.session_for(&user_id);

        let res = app.post_with_cookie("/api/user/pin", json!({"newPin": "222222"}), &cookie).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        let res = app
            .post_with_cookie("/api/user/pin", json!({"currentPin": "000000", "newPin": "222222"}), &cookie)
            .await;
        assert_eq!(res.status, StatusCode::FORBIDDEN);
        assert_eq!(res.body, json!({"error": "Current PIN is incorrect"}));

        // The session survives a wrong guess
        let res = app.get_with_cookie("/api/user/profile", &cookie).await;
        assert_eq!(res.status, StatusCode::OK);
        let res = app
            .post_with_cookie("/api/user/pin", json!({"currentPin": "123456", "newPin": "222222"}), &cookie)
            .await;
        assert_eq!(res.status, StatusCode::OK);

        let res = app.post("/api/auth/login", json!({"phone": "60123456789", "pin": "222222"})).await;
        assert_eq!(res.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn current_pin_guesses_are_throttled_per_user() {
        let app = TestApp::new();
        let user_id = app.user("60123456789", Some("123456"));
        let cookie = app.session_for(&user_id);

        for guess in ["000000", "000001", "000002", "000003", "000004"] {
            let res = app
                .post_with_cookie("/api/user/pin", json!({"currentPin": guess, "newPin": "222222"}), &cookie)
                .await;
            assert_eq!(res.status, StatusCode::FORBIDDEN);
        }

        // Even the right PIN is refused until the window passes
        let res = app
            .post_with_cookie("/api/user/pin", json!({"currentPin": "123456", "newPin": "222222"}), &cookie)
            .await;
        assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers.get("x-ratelimit-limit").unwrap(), "5");

        // A second session for the same user shares the budget; other users do not
        let res = app
            .post_with_cookie(
                "/api/user/pin",
                json!({"currentPin": "123456", "newPin": "222222"}),
                &app.session_for(&user_id),
            )
            .await;
        assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
        let other = app.user("60199999999", Some("123456"));
        let res = app
            .post_with_cookie(
                "/api/user/pin",
                json!({"currentPin": "123456", "newPin": "222222"}),
                &app.session_for(&other),
            )
            .await;
        assert_eq!(res.status, StatusCode::OK);

        // The rest of the dashboard stays reachable
        let res = app.get_with_cookie("/api/user/profile", &cookie).await;
        assert_eq!(res.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn first_pin_needs_no_current() {
        let app = TestApp::new();
        let user_id = app.user("60123456789", None);
        let cookie = app.session_for(&user_id);
        let res = app.post_with_cookie("/api/user/pin", json!({"newPin": "222222"}), &cookie).await;
        assert_eq!(res.status, StatusCode::OK);
        let res = app.post("/api/auth/check-pin", json!({"phone": "60123456789"})).await;
        assert_eq!(res.body["hasPin"], true);
    }

    #[tokio::test]
    async fn delete_account_releases_votes() {
        let app = TestApp::new();
        let user_id = app.user("60123456789", Some("123456"));
        let other = app.user("60199999999", Some("123456"));
        let cookie = app.session_for(&user_id);
        let other_cookie = app.session_for(&other);

        let vote = json!({"integrationId": "slack"});
        app.post_with_cookie("/api/integrations/votes", vote.clone(), &cookie).await;
        app.post_with_cookie("/api/integrations/votes", vote, &other_cookie).await;
        app.post_with_cookie("/api/memories", json!({"title": "a", "content": "b"}), &cookie).await;
        app.subscription(&user_id, "active", 100);
        app.billing.add_remote("sub_test", "active", 1_800_000_000);

        let res = app.delete_with_cookie("/api/user/account", &cookie).await;
        assert_eq!(res.status, StatusCode::OK);
        assert!(res.set_cookie().unwrap().contains("Max-Age=0"));

        assert_eq!(app.state.db.vote_count("slack").unwrap(), 1);
        assert!(app.state.db.get_user_by_id(&user_id).unwrap().is_none());
        assert!(app.state.db.list_memories(&user_id).unwrap().is_empty());
        assert!(app.state.db.get_subscription_by_user(&user_id).unwrap().is_none());
        assert_eq!(app.billing.cancelled(), vec!["sub_test".to_string()]);

        let res = app.get_with_cookie("/api/user/profile", &cookie).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn delete_survives_billing_outage() {
        let app = TestApp::new();
        let user_id = app.user("60123456789", Some("123456"));
        app.subscription(&user_id, "active", 100);
        app.billing.fail_all();
        let cookie = app.session_for(&user_id);

        let res = app.delete_with_cookie("/api/user/account", &cookie).await;
        assert_eq!(res.status, StatusCode::OK);
        assert!(app.state.db.get_user_by_id(&user_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn export_is_a_download_with_everything() {
        let app = TestApp::new();
        let user_id = app.user("60123456789", Some("123456"));
        let cookie = app.session_for(&user_id);
        app.post_with_cookie("/api/memories", json!({"title": "Secret", "content": "Plain"}), &cookie).await;
        app.post_with_cookie(
            "/api/calendar/events",
            json!({"title": "Gym", "startTime": "2026-11-01T07:00:00Z", "reminder": true}),
            &cookie,
        )
        .await;
        app.post_with_cookie("/api/integrations/votes", json!({"integrationId": "gmail"}), &cookie).await;
        app.post_with_cookie("/api/feedback", json!({"message": "Nice"}), &cookie).await;

        let res = app.get_with_cookie("/api/user/export", &cookie).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(
            res.headers.get("content-disposition").unwrap(),
            "attachment; filename=\"aide-export.json\""
        );
        assert_eq!(res.body["profile"]["id"], user_id);
        assert_eq!(res.body["memories"][0]["title"], "Secret");
        assert_eq!(res.body["calendarEvents"][0]["title"], "Gym");
        assert_eq!(res.body["reminders"].as_array().unwrap().len(), 1);
        assert_eq!(res.body["integrationVotes"], json!(["gmail"]));
        assert_eq!(res.body["feedback"][0]["message"], "Nice");
        assert_eq!(res.body["subscription"], serde_json::Value::Null);
    }
}
