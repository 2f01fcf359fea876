use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue};
use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

use aide_db::Database;

/// Hits currently inside a sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    pub count: u64,
    pub oldest_ms: i64,
}

/// Shared key-value backend holding the sliding-window log.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Record a hit at `now_ms` and return the window it falls into.
    async fn record_hit(&self, key: &str, now_ms: i64, window_ms: i64) -> Result<WindowState>;
}

/// What to do when the store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnUnavailable {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy)]
pub struct Policy {
    pub name: &'static str,
    pub limit: u64,
    pub window_ms: i64,
}

/// General traffic: 100 requests per 10 seconds.
pub const GENERAL: Policy = Policy {
    name: "general",
    limit: 100,
    window_ms: 10_000,
};

/// Authentication endpoints: 5 requests per minute.
pub const AUTH: Policy = Policy {
    name: "auth",
    limit: 5,
    window_ms: 60_000,
};

/// Hits older than this are outside every policy's window.
pub const RETENTION_MS: i64 = if GENERAL.window_ms > AUTH.window_ms {
    GENERAL.window_ms
} else {
    AUTH.window_ms
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub limited: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Unix millis at which the oldest counted hit leaves the window.
    pub reset_ms: i64,
}

impl RateLimitDecision {
    pub fn write_headers(&self, headers: &mut HeaderMap) {
        headers.insert("x-ratelimit-limit", HeaderValue::from(self.limit));
        headers.insert("x-ratelimit-remaining", HeaderValue::from(self.remaining));
        headers.insert("x-ratelimit-reset", HeaderValue::from(self.reset_ms));
    }
}

pub struct RateLimiter {
    policy: Policy,
    store: Arc<dyn RateLimitStore>,
    on_unavailable: OnUnavailable,
}

impl RateLimiter {
    pub fn new(policy: Policy, store: Arc<dyn RateLimitStore>, on_unavailable: OnUnavailable) -> Self {
        Self {
            policy,
            store,
            on_unavailable,
        }
    }

    pub async fn check(&self, identifier: &str) -> RateLimitDecision {
        self.check_at(identifier, Utc::now().timestamp_millis()).await
    }

    pub async fn check_at(&self, identifier: &str, now_ms: i64) -> RateLimitDecision {
        let key = format!("ratelimit:{}:{}", self.policy.name, identifier);
        let limit = self.policy.limit;

        match self.store.record_hit(&key, now_ms, self.policy.window_ms).await {
            Ok(window) => RateLimitDecision {
                limited: window.count > limit,
                limit,
                remaining: limit.saturating_sub(window.count),
                reset_ms: window.oldest_ms + self.policy.window_ms,
            },
            Err(e) => {
                warn!(
                    "Rate limit store unavailable for {} ({:?}): {:#}",
                    self.policy.name, self.on_unavailable, e
                );
                let allow = self.on_unavailable == OnUnavailable::Allow;
                RateLimitDecision {
                    limited: !allow,
                    limit,
                    remaining: if allow { limit } else { 0 },
                    reset_ms: now_ms + self.policy.window_ms,
                }
            }
        }
    }
}

/// Window log kept in the application database.
pub struct SqliteRateLimitStore {
    db: Arc<Database>,
}

impl SqliteRateLimitStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RateLimitStore for SqliteRateLimitStore {
    async fn record_hit(&self, key: &str, now_ms: i64, window_ms: i64) -> Result<WindowState> {
        let (count, oldest_ms) = self.db.record_rate_limit_hit(key, now_ms, window_ms)?;
        Ok(WindowState { count, oldest_ms })
    }
}

/// Window log kept in a sorted set behind a Redis-over-REST endpoint
/// (Upstash-compatible `/pipeline`).
pub struct RestRateLimitStore {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl RestRateLimitStore {
    pub fn new(client: reqwest::Client, url: &str, token: &str) -> Self {
        Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }
}

#[async_trait]
impl RateLimitStore for RestRateLimitStore {
    async fn record_hit(&self, key: &str, now_ms: i64, window_ms: i64) -> Result<WindowState> {
        let member = format!("{}-{}", now_ms, Uuid::new_v4());
        let commands = json!([
            ["ZREMRANGEBYSCORE", key, "0", (now_ms - window_ms).to_string()],
            ["ZADD", key, now_ms.to_string(), member],
            ["ZCARD", key],
            ["ZRANGE", key, "0", "0", "WITHSCORES"],
            ["PEXPIRE", key, window_ms.to_string()],
        ]);

        let replies: Vec<Value> = self
            .client
            .post(format!("{}/pipeline", self.url))
            .bearer_auth(&self.token)
            .json(&commands)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_pipeline(&replies, now_ms)
    }
}

fn parse_pipeline(replies: &[Value], now_ms: i64) -> Result<WindowState> {
    if let Some(err) = replies.iter().find_map(|r| r.get("error")) {
        return Err(anyhow!("rate limit backend error: {}", err));
    }

    let count = replies
        .get(2)
        .and_then(|r| r["result"].as_u64())
        .ok_or_else(|| anyhow!("unexpected ZCARD reply"))?;

    // ZRANGE WITHSCORES replies [member, score]
    let oldest_ms = replies
        .get(3)
        .and_then(|r| r["result"].get(1))
        .and_then(|score| match score {
            Value::String(s) => s.parse::<f64>().ok(),
            Value::Number(n) => n.as_f64(),
            _ => None,
        })
        .map(|score| score as i64)
        .unwrap_or(now_ms);

    Ok(WindowState { count, oldest_ms })
}
