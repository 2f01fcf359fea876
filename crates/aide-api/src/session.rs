use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use aide_db::Database;

pub const SESSION_COOKIE: &str = "session";
pub const SESSION_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User id.
    pub sub: String,
    /// Session row id, deleted on logout.
    pub sid: String,
    pub iat: usize,
    pub exp: usize,
}

/// Identity bound to a verified session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub user_id: String,
    pub session_id: String,
}

/// Issues and verifies session tokens: an HS256 JWT pointing at a `sessions` row.
pub struct SessionManager {
    db: Arc<Database>,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SessionManager {
    pub fn new(db: Arc<Database>, secret: &str) -> Self {
        Self {
            db,
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn create_session(&self, user_id: &str) -> anyhow::Result<String> {
        self.issue(user_id, Utc::now())
    }

    fn issue(&self, user_id: &str, issued_at: DateTime<Utc>) -> anyhow::Result<String> {
        let expires_at = issued_at + Duration::hours(SESSION_TTL_HOURS);
        let sid = Uuid::new_v4().to_string();

        self.db
            .create_session(&sid, user_id, expires_at.timestamp(), issued_at.timestamp())?;

        let claims = SessionClaims {
            sub: user_id.to_string(),
            sid,
            iat: issued_at.timestamp() as usize,
            exp: expires_at.timestamp() as usize,
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    /// `None` for anything that is not a live session. Never errors: storage
    /// failures are logged and treated as logged out.
    pub fn verify_session(&self, token: &str) -> Option<SessionUser> {
        let claims = self.decode(token)?;

        match self
            .db
            .session_is_active(&claims.sid, &claims.sub, Utc::now().timestamp())
        {
            Ok(true) => Some(SessionUser {
                user_id: claims.sub,
                session_id: claims.sid,
            }),
            Ok(false) => None,
            Err(e) => {
                warn!("Session lookup failed: {:#}", e);
                None
            }
        }
    }

    /// Delete the session row behind `token` (logout). Expired or tampered
    /// tokens have nothing to revoke.
    pub fn revoke(&self, token: &str) -> anyhow::Result<()> {
        if let Some(claims) = self.decode(token) {
            self.db.delete_session(&claims.sid)?;
        }
        Ok(())
    }

    fn decode(&self, token: &str) -> Option<SessionClaims> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        decode::<SessionClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .ok()
    }
}

/// `Set-Cookie` value for a fresh session.
pub fn session_cookie(token: &str, secure: bool) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}{}",
        SESSION_COOKIE,
        token,
        SESSION_TTL_HOURS * 3600,
        if secure { "; Secure" } else { "" }
    )
}

/// `Set-Cookie` value that expires the session cookie.
pub fn clear_session_cookie(secure: bool) -> String {
    format!(
        "{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0{}",
        SESSION_COOKIE,
        if secure { "; Secure" } else { "" }
    )
}
