use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use axum_extra::extract::CookieJar;
use chrono::{Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use aide_crypto::hash::{constant_time_eq, hash_phone, hash_pin, reset_token};
use aide_db::models::UserRow;
use aide_types::api::{
    CheckPinResponse, ForgotPinResponse, LoginRequest, LoginResponse, PhoneRequest, RegisterRequest,
    RegisterResponse, ResetPinRequest, SessionResponse, SuccessResponse,
};
use aide_types::models::Persona;

use crate::error::{ApiError, ApiJson};
use crate::messaging::mask_phone;
use crate::middleware::session_user;
use crate::phone::{is_valid_pin, normalize_phone};
use crate::session::{SESSION_COOKIE, clear_session_cookie, session_cookie};
use crate::state::AppState;
use crate::views::user_summary;

pub const FORGOT_PIN_MESSAGE: &str = "If an account exists for this number, a reset link has been sent.";
const RESET_LINK_TTL_MINUTES: i64 = 60;
const INVALID_RESET_LINK: &str = "Invalid or expired reset link";

pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let phone = normalize_phone(&req.phone).ok_or_else(|| ApiError::validation("Invalid phone number"))?;
    throttle_phone(&state, &phone).await?;
    if !is_valid_pin(&req.pin) {
        return Err(ApiError::validation("PIN must be exactly 6 digits"));
    }
    let email = normalize_email(req.email.as_deref())?;
    let name = req.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());

    let pepper = &state.config.hash_pepper;
    let phone_hash = hash_phone(pepper, &phone);
    if state.db.get_user_by_phone_hash(&phone_hash)?.is_some() {
        return Err(ApiError::Conflict(
            "An account with this phone number already exists".into(),
        ));
    }

    let now = Utc::now();
    let user_id = Uuid::new_v4();
    state.db.create_user(&UserRow {
        id: user_id.to_string(),
        phone_hash,
        pin_hash: Some(hash_pin(pepper, &req.pin)),
        name,
        email,
        persona: Persona::Friendly.as_str().to_string(),
        created_at: now,
        updated_at: now,
    })?;

    let token = state.sessions.create_session(&user_id.to_string())?;
    info!("Registered user {}", user_id);

    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, session_cookie(&token, state.config.production))],
        Json(RegisterResponse { user_id }),
    ))
}

/// Every rejection returns the same 401 body so callers cannot tell which check failed.
pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let phone = normalize_phone(&req.phone).ok_or(ApiError::InvalidCredentials)?;
    throttle_phone(&state, &phone).await?;
    let user = authenticate(&state, &phone, &req.pin)?.ok_or(ApiError::InvalidCredentials)?;

    if let Err(e) = state.db.purge_expired_sessions(Utc::now().timestamp()) {
        warn!("Failed to purge expired sessions: {:#}", e);
    }

    let token = state.sessions.create_session(&user.id)?;

    Ok((
        [(header::SET_COOKIE, session_cookie(&token, state.config.production))],
        Json(LoginResponse {
            success: true,
            user: user_summary(&user),
        }),
    ))
}

/// `Ok(None)` for any credential mismatch; `Err` only for storage failures.
fn authenticate(state: &AppState, phone: &str, pin: &str) -> anyhow::Result<Option<UserRow>> {
    if !is_valid_pin(pin) {
        return Ok(None);
    }

    let pepper = &state.config.hash_pepper;
    let Some(user) = state.db.get_user_by_phone_hash(&hash_phone(pepper, phone))? else {
        return Ok(None);
    };
    let Some(stored) = user.pin_hash.as_deref() else {
        return Ok(None);
    };

    if constant_time_eq(stored, &hash_pin(pepper, pin)) {
        Ok(Some(user))
    } else {
        Ok(None)
    }
}

/// Auth policy keyed by the number being tried, whatever address it comes from.
async fn throttle_phone(state: &AppState, phone: &str) -> Result<(), ApiError> {
    let key = format!("phone:{}", hash_phone(&state.config.hash_pepper, phone));
    let decision = state.auth_limiter.check(&key).await;
    if decision.limited {
        warn!("Auth attempts throttled for {}", mask_phone(phone));
        return Err(ApiError::RateLimited(decision));
    }
    Ok(())
}

pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Err(e) = state.sessions.revoke(cookie.value()) {
            warn!("Failed to revoke session: {:#}", e);
        }
    }

    (
        [(header::SET_COOKIE, clear_session_cookie(state.config.production))],
        Json(SuccessResponse {
            success: true,
            message: "Logged out".into(),
        }),
    )
}

/// Pure read; every failure degrades to the logged-out state.
pub async fn session(State(state): State<AppState>, jar: CookieJar) -> Json<SessionResponse> {
    let user = session_user(&state, &jar).and_then(|s| match state.db.get_user_by_id(&s.user_id) {
        Ok(user) => user,
        Err(e) => {
            warn!("Session user lookup failed: {:#}", e);
            None
        }
    });

    Json(SessionResponse {
        authenticated: user.is_some(),
        user: user.as_ref().map(user_summary),
    })
}

pub async fn check_pin(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<PhoneRequest>,
) -> Result<Json<CheckPinResponse>, ApiError> {
    let phone = normalize_phone(&req.phone).ok_or_else(|| ApiError::validation("Invalid phone number"))?;
    throttle_phone(&state, &phone).await?;
    let user = state
        .db
        .get_user_by_phone_hash(&hash_phone(&state.config.hash_pepper, &phone))?;

    Ok(Json(CheckPinResponse {
        has_pin: user.is_some_and(|u| u.pin_hash.is_some()),
    }))
}

/// Always answers with the same success body, whether or not the number is
/// known and whether or not delivery worked. Throttling is keyed on the input,
/// so a 429 says nothing about the account either.
pub async fn forgot_pin(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<PhoneRequest>,
) -> Result<Json<ForgotPinResponse>, ApiError> {
    if let Some(phone) = normalize_phone(&req.phone) {
        throttle_phone(&state, &phone).await?;
        if let Err(e) = send_reset_link(&state, &phone).await {
            warn!("Forgot-PIN for {} failed: {:#}", mask_phone(&phone), e);
        }
    }

    Ok(Json(ForgotPinResponse {
        success: true,
        message: FORGOT_PIN_MESSAGE.to_string(),
    }))
}

async fn send_reset_link(state: &AppState, phone: &str) -> anyhow::Result<()> {
    let pepper = &state.config.hash_pepper;
    let Some(user) = state.db.get_user_by_phone_hash(&hash_phone(pepper, phone))? else {
        return Ok(());
    };

    let expires = (Utc::now() + Duration::minutes(RESET_LINK_TTL_MINUTES)).timestamp();
    let token = reset_token(pepper, phone, &user.id, expires, user.pin_hash.as_deref());
    let link = format!(
        "{}/reset-pin?token={}&phone={}&id={}&expires={}",
        state.config.public_url, token, phone, user.id, expires
    );

    state
        .messenger
        .send(
            phone,
            &format!(
                "Reset your Aide PIN: {}\nThis link expires in {} minutes.",
                link, RESET_LINK_TTL_MINUTES
            ),
        )
        .await?;

    info!("Reset link sent for user {}", user.id);
    Ok(())
}

pub async fn reset_pin(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ResetPinRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    if !is_valid_pin(&req.new_pin) {
        return Err(ApiError::validation("PIN must be exactly 6 digits"));
    }
    let phone = normalize_phone(&req.phone).ok_or_else(|| ApiError::validation(INVALID_RESET_LINK))?;
    throttle_phone(&state, &phone).await?;
    if req.expires < Utc::now().timestamp() {
        return Err(ApiError::validation(INVALID_RESET_LINK));
    }

    let pepper = &state.config.hash_pepper;
    let user = state
        .db
        .get_user_by_phone_hash(&hash_phone(pepper, &phone))?
        .filter(|u| u.id == req.user_id)
        .ok_or_else(|| ApiError::validation(INVALID_RESET_LINK))?;

    let expected = reset_token(pepper, &phone, &user.id, req.expires, user.pin_hash.as_deref());
    if !constant_time_eq(&expected, &req.token) {
        return Err(ApiError::validation(INVALID_RESET_LINK));
    }

    state
        .db
        .set_pin_hash(&user.id, &hash_pin(pepper, &req.new_pin), Utc::now())?;
    let revoked = state.db.delete_user_sessions(&user.id)?;
    info!("PIN reset for user {} ({} sessions revoked)", user.id, revoked);

    Ok(Json(SuccessResponse {
        success: true,
        message: "PIN has been reset".into(),
    }))
}

pub(crate) fn normalize_email(email: Option<&str>) -> Result<Option<String>, ApiError> {
    let Some(email) = email.map(str::trim).filter(|e| !e.is_empty()) else {
        return Ok(None);
    };
    let valid = email.len() <= 254
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid {
        return Err(ApiError::validation("Invalid email address"));
    }
    Ok(Some(email.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::test_support::{TestApp, extract_reset_link};

    #[tokio::test]
    async fn login_sets_session_cookie() {
        let app = TestApp::new();
        let user_id = app.user("60123456789", Some("123456"));

        let res = app.post("/api/auth/login", json!({"phone": "+60 12-345 6789", "pin": "123456"})).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["success"], true);
        assert_eq!(res.body["user"]["id"], user_id);

        let cookie = res.set_cookie().unwrap();
        assert!(cookie.starts_with("session="));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Max-Age=86400"));
        assert!(cookie.contains("Path=/"));
        assert!(!cookie.contains("Secure"));

        let session = app.get_with_cookie("/api/auth/session", &res.session_cookie().unwrap()).await;
        assert_eq!(session.body["authenticated"], true);
        assert_eq!(session.body["user"]["id"], user_id);
    }

    #[tokio::test]
    async fn production_cookie_is_secure() {
        let app = TestApp::production();
        app.user("60123456789", Some("123456"));
        let res = app.post("/api/auth/login", json!({"phone": "60123456789", "pin": "123456"})).await;
        assert!(res.set_cookie().unwrap().ends_with("; Secure"));
    }

    #[tokio::test]
    async fn unknown_phone_is_invalid_credentials() {
        let app = TestApp::new();
        let res = app.post("/api/auth/login", json!({"phone": "60123456789", "pin": "123456"})).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.body, json!({"error": "Invalid credentials"}));
        assert!(res.set_cookie().is_none());
    }

    #[tokio::test]
    async fn every_login_failure_looks_the_same() {
        let app = TestApp::new();
        app.user("60123456789", Some("123456"));
        app.user("60199999999", None);

        let attempts = [
            json!({"phone": "60133333333", "pin": "123456"}),
            json!({"phone": "60123456789", "pin": "654321"}),
            json!({"phone": "60123456789", "pin": "12ab56"}),
            json!({"phone": "60123456789", "pin": "1234567"}),
            json!({"phone": "not a phone", "pin": "123456"}),
            json!({"phone": "60199999999", "pin": "123456"}),
        ];

        for attempt in attempts {
            let res = app.post("/api/auth/login", attempt.clone()).await;
            assert_eq!(res.status, StatusCode::UNAUTHORIZED, "{attempt}");
            assert_eq!(res.body, json!({"error": "Invalid credentials"}), "{attempt}");
        }
    }

    #[tokio::test]
    async fn phone_attempts_are_throttled_across_addresses() {
        let app = TestApp::new();
        app.user("60123456789", Some("123456"));

        // Each request arrives from its own address
        for _ in 0..5 {
            let res = app.post("/api/auth/login", json!({"phone": "60123456789", "pin": "000000"})).await;
            assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        }

        // The right PIN no longer helps, and other endpoints share the budget
        let res = app.post("/api/auth/login", json!({"phone": "60123456789", "pin": "123456"})).await;
        assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.body, json!({"error": "Too many requests"}));
        assert_eq!(res.headers.get("x-ratelimit-limit").unwrap(), "5");
        let res = app.post("/api/auth/forgot-pin", json!({"phone": "012-345 6789"})).await;
        assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
        assert!(app.messenger.sent().is_empty());

        // Other numbers are unaffected
        app.user("60199999999", Some("123456"));
        let res = app.post("/api/auth/login", json!({"phone": "60199999999", "pin": "123456"})).await;
        assert_eq!(res.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn logged_out_session_check() {
        let app = TestApp::new();
        let res = app.get("/api/auth/session").await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body, json!({"authenticated": false}));

        let res = app.get_with_cookie("/api/auth/session", "session=garbage").await;
        assert_eq!(res.body, json!({"authenticated": false}));
    }

    #[tokio::test]
    async fn logout_revokes_the_session() {
        let app = TestApp::new();
        let user_id = app.user("60123456789", Some("123456"));
        let cookie = app.session_for(&user_id);

        let res = app.post_with_cookie("/api/auth/logout", json!({}), &cookie).await;
        assert_eq!(res.status, StatusCode::OK);
        assert!(res.set_cookie().unwrap().contains("Max-Age=0"));

        let res = app.get_with_cookie("/api/user/profile", &cookie).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn register_then_duplicate() {
        let app = TestApp::new();
        let body = json!({"phone": "012-345 6789", "pin": "123456", "name": "Aisyah", "email": "A@Example.com"});
        let res = app.post("/api/auth/register", body.clone()).await;
        assert_eq!(res.status, StatusCode::CREATED);
        assert!(res.set_cookie().is_some());

        let profile = app
            .get_with_cookie("/api/user/profile", &res.session_cookie().unwrap())
            .await;
        assert_eq!(profile.body["data"]["email"], "a@example.com");

        let res = app.post("/api/auth/register", body).await;
        assert_eq!(res.status, StatusCode::CONFLICT);

        let res = app
            .post("/api/auth/register", json!({"phone": "60133333333", "pin": "12345"}))
            .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn check_pin_reports_pin_presence() {
        let app = TestApp::new();
        app.user("60123456789", Some("123456"));
        app.user("60199999999", None);

        let res = app.post("/api/auth/check-pin", json!({"phone": "60123456789"})).await;
        assert_eq!(res.body, json!({"hasPin": true}));
        let res = app.post("/api/auth/check-pin", json!({"phone": "60199999999"})).await;
        assert_eq!(res.body, json!({"hasPin": false}));
        let res = app.post("/api/auth/check-pin", json!({"phone": "60133333333"})).await;
        assert_eq!(res.body, json!({"hasPin": false}));
        let res = app.post("/api/auth/check-pin", json!({"phone": "abc"})).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn forgot_pin_never_reveals_existence() {
        let app = TestApp::new();
        app.user("60123456789", Some("123456"));

        let known = app.post("/api/auth/forgot-pin", json!({"phone": "60123456789"})).await;
        let unknown = app.post("/api/auth/forgot-pin", json!({"phone": "60133333333"})).await;
        let malformed = app.post("/api/auth/forgot-pin", json!({"phone": "nope"})).await;

        for res in [&known, &unknown, &malformed] {
            assert_eq!(res.status, StatusCode::OK);
            assert_eq!(res.body, known.body);
        }
        assert_eq!(known.body["message"], FORGOT_PIN_MESSAGE);
        assert_eq!(app.messenger.sent().len(), 1);
    }

    #[tokio::test]
    async fn forgot_pin_hides_delivery_failures() {
        let app = TestApp::new();
        app.user("60123456789", Some("123456"));
        app.messenger.fail_next();

        let res = app.post("/api/auth/forgot-pin", json!({"phone": "60123456789"})).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["success"], true);
    }

    #[tokio::test]
    async fn reset_link_works_once() {
        let app = TestApp::new();
        let user_id = app.user("60123456789", Some("123456"));
        let old_session = app.session_for(&user_id);

        app.post("/api/auth/forgot-pin", json!({"phone": "60123456789"})).await;
        let (_, message) = app.messenger.sent().pop().unwrap();
        let link = extract_reset_link(&message);
        assert_eq!(link["id"], user_id);

        let reset = json!({
            "token": link["token"],
            "phone": link["phone"],
            "userId": link["id"],
            "expires": link["expires"].parse::<i64>().unwrap(),
            "newPin": "654321",
        });

        let res = app.post("/api/auth/reset-pin", reset.clone()).await;
        assert_eq!(res.status, StatusCode::OK);

        // Old sessions are gone, the new PIN works, the old one does not
        let res = app.get_with_cookie("/api/user/profile", &old_session).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        let res = app.post("/api/auth/login", json!({"phone": "60123456789", "pin": "654321"})).await;
        assert_eq!(res.status, StatusCode::OK);
        let res = app.post("/api/auth/login", json!({"phone": "60123456789", "pin": "123456"})).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);

        // The link is bound to the previous PIN and cannot be replayed
        let res = app.post("/api/auth/reset-pin", reset).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn reset_rejects_forged_or_expired_links() {
        let app = TestApp::new();
        let user_id = app.user("60123456789", Some("123456"));
        let pepper = app.state.config.hash_pepper.clone();

        let expired = Utc::now().timestamp() - 10;
        let pin_hash = hash_pin(&pepper, "123456");
        let token = reset_token(&pepper, "60123456789", &user_id, expired, Some(&pin_hash));
        let res = app
            .post(
                "/api/auth/reset-pin",
                json!({"token": token, "phone": "60123456789", "userId": user_id, "expires": expired, "newPin": "111111"}),
            )
            .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["error"], INVALID_RESET_LINK);

        let future = Utc::now().timestamp() + 600;
        let res = app
            .post(
                "/api/auth/reset-pin",
                json!({"token": "0".repeat(64), "phone": "60123456789", "userId": user_id, "expires": future, "newPin": "111111"}),
            )
            .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);

        let token = reset_token(&pepper, "60123456789", &user_id, future, Some(&pin_hash));
        let res = app
            .post(
                "/api/auth/reset-pin",
                json!({"token": token, "phone": "60123456789", "userId": user_id, "expires": future, "newPin": "12"}),
            )
            .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["error"], "PIN must be exactly 6 digits");
    }

    #[test]
    fn email_normalization() {
        assert_eq!(normalize_email(None).unwrap(), None);
        assert_eq!(normalize_email(Some("  ")).unwrap(), None);
        assert_eq!(
            normalize_email(Some(" Me@Example.COM ")).unwrap().as_deref(),
            Some("me@example.com")
        );
        assert!(normalize_email(Some("nobody")).is_err());
        assert!(normalize_email(Some("@example.com")).is_err());
    }
}
