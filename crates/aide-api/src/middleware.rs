use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use tracing::debug;

use crate::config::ProxyConfig;
use crate::error::ApiError;
use crate::rate_limit::RateLimiter;
use crate::session::{SESSION_COOKIE, SessionUser};
use crate::state::AppState;

/// Authenticated caller, inserted by `require_session`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub session_id: String,
}

impl From<SessionUser> for AuthUser {
    fn from(user: SessionUser) -> Self {
        Self {
            user_id: user.user_id,
            session_id: user.session_id,
        }
    }
}

/// Resolve the session cookie, if it names a live session.
pub fn session_user(state: &AppState, jar: &CookieJar) -> Option<SessionUser> {
    let token = jar.get(SESSION_COOKIE)?.value();
    state.sessions.verify_session(token)
}

/// Verify the session cookie and expose the caller as `Extension<AuthUser>`.
pub async fn require_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = session_user(&state, &jar).ok_or(ApiError::Unauthorized)?;
    req.extensions_mut().insert(AuthUser::from(user));
    Ok(next.run(req).await)
}

pub async fn general_rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let key = client_key(&state, &req);
    enforce(&state.general_limiter, key, req, next).await
}

pub async fn auth_rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let key = client_key(&state, &req);
    enforce(&state.auth_limiter, key, req, next).await
}

/// Auth policy keyed by the signed-in user. Runs inside `require_session`.
pub async fn user_auth_rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let key = match req.extensions().get::<AuthUser>() {
        Some(user) => format!("user:{}", user.user_id),
        None => client_key(&state, &req),
    };
    enforce(&state.auth_limiter, key, req, next).await
}

fn client_key(state: &AppState, req: &Request) -> String {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    client_ip(&state.config.proxy, req.headers(), peer)
}

async fn enforce(limiter: &RateLimiter, key: String, req: Request, next: Next) -> Response {
    let decision = limiter.check(&key).await;
    let mut response = if decision.limited {
        debug!("Rate limited {} on {}", key, req.uri().path());
        ApiError::RateLimited(decision).into_response()
    } else {
        next.run(req).await
    };

    // The innermost (route-specific) limiter's headers take precedence
    if !response.headers().contains_key("x-ratelimit-limit") {
        decision.write_headers(response.headers_mut());
    }
    response
}

/// Caller address for rate limiting.
///
/// Without a trusted proxy only the socket peer counts. Behind one, the
/// `x-forwarded-for` chain is read from the right and the first hop that is
/// not one of our own proxies is the client; everything left of it is
/// client-supplied.
pub fn client_ip(proxy: &ProxyConfig, headers: &HeaderMap, peer: Option<IpAddr>) -> String {
    let from_peer = || peer.map(|ip| ip.to_string()).unwrap_or_else(|| "unknown".to_string());
    if !proxy.trust_forwarded {
        return from_peer();
    }

    let forwarded = header_str(headers, "x-forwarded-for").and_then(|chain| {
        chain
            .rsplit(',')
            .map(str::trim)
            .filter(|hop| !hop.is_empty())
            .find(|hop| !hop.parse::<IpAddr>().is_ok_and(|ip| proxy.is_trusted_hop(&ip)))
    });

    forwarded
        .or_else(|| header_str(headers, "x-real-ip").map(str::trim).filter(|v| !v.is_empty()))
        .map(str::to_string)
        .unwrap_or_else(from_peer)
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
