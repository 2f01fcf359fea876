//! In-process harness: the real router over an in-memory database, with fake
//! billing and messaging providers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use aide_crypto::hash::{hash_phone, hash_pin};
use aide_db::Database;
use aide_db::models::UserRow;
use aide_db::subscriptions::SubscriptionSync;

use crate::config::{AppConfig, ProxyConfig, StripeConfig};
use crate::messaging::Messenger;
use crate::phone::normalize_phone;
use crate::rate_limit::SqliteRateLimitStore;
use crate::routes::build_router;
use crate::session::SESSION_COOKIE;
use crate::state::{AppState, AppStateInner};
use crate::stripe::{
    BillingProvider, CheckoutParams, CheckoutSession, Price, RemoteSubscription, SubscriptionItem,
    SubscriptionItems,
};

pub const WEBHOOK_SECRET: &str = "whsec_test";

pub fn test_config(production: bool) -> AppConfig {
    AppConfig {
        host: "127.0.0.1".into(),
        port: 0,
        db_path: ":memory:".into(),
        session_secret: "test-session-secret".into(),
        hash_pepper: "test-pepper".into(),
        memory_key: [7u8; 32],
        public_url: "https://aide.test".into(),
        production,
        // Requests reach the router as if through one proxy that appends the caller's address
        proxy: ProxyConfig {
            trust_forwarded: true,
            trusted_hops: Vec::new(),
        },
        stripe: StripeConfig {
            secret_key: "sk_test".into(),
            webhook_secret: WEBHOOK_SECRET.into(),
            price_monthly: "price_monthly".into(),
            price_yearly: "price_yearly".into(),
        },
        rate_limit_backend: None,
        twilio: None,
    }
}

#[derive(Default)]
struct BillingState {
    remote: Vec<RemoteSubscription>,
    checkouts: Vec<CheckoutParams>,
    cancelled: Vec<String>,
    failing: bool,
}

#[derive(Default)]
pub struct FakeBilling {
    inner: Mutex<BillingState>,
}

impl FakeBilling {
    pub fn add_remote(&self, id: &str, status: &str, period_end: i64) {
        let mut inner = self.inner.lock().unwrap();
        let created = inner.remote.len() as i64 + 1;
        inner.remote.push(RemoteSubscription {
            id: id.into(),
            customer: "cus_test".into(),
            status: status.into(),
            cancel_at_period_end: false,
            current_period_end: Some(period_end),
            created,
            items: SubscriptionItems {
                data: vec![SubscriptionItem {
                    price: Price {
                        id: "price_monthly".into(),
                    },
                    current_period_end: None,
                }],
            },
        });
    }

    pub fn fail_all(&self) {
        self.inner.lock().unwrap().failing = true;
    }

    pub fn last_checkout(&self) -> Option<CheckoutParams> {
        self.inner.lock().unwrap().checkouts.last().cloned()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.inner.lock().unwrap().cancelled.clone()
    }
}

#[async_trait]
impl BillingProvider for FakeBilling {
    async fn create_checkout_session(&self, params: &CheckoutParams) -> Result<CheckoutSession> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing {
            bail!("billing provider unavailable");
        }
        inner.checkouts.push(params.clone());
        let id = format!("cs_{}", inner.checkouts.len());
        Ok(CheckoutSession {
            url: Some(format!("https://checkout.test/{}", id)),
            id,
        })
    }

    async fn list_subscriptions(&self, customer_id: &str) -> Result<Vec<RemoteSubscription>> {
        let inner = self.inner.lock().unwrap();
        if inner.failing {
            bail!("billing provider unavailable");
        }
        Ok(inner.remote.iter().filter(|s| s.customer == customer_id).cloned().collect())
    }

    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<RemoteSubscription> {
        let inner = self.inner.lock().unwrap();
        match inner.remote.iter().find(|s| s.id == subscription_id) {
            Some(sub) if !inner.failing => Ok(sub.clone()),
            _ => bail!("no such subscription: {}", subscription_id),
        }
    }

    async fn cancel_at_period_end(&self, subscription_id: &str) -> Result<RemoteSubscription> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing {
            bail!("billing provider unavailable");
        }
        inner.cancelled.push(subscription_id.to_string());
        let Some(sub) = inner.remote.iter_mut().find(|s| s.id == subscription_id) else {
            bail!("no such subscription: {}", subscription_id);
        };
        sub.cancel_at_period_end = true;
        Ok(sub.clone())
    }
}

#[derive(Default)]
pub struct FakeMessenger {
    sent: Mutex<Vec<(String, String)>>,
    fail_next: AtomicBool,
}

impl FakeMessenger {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Messenger for FakeMessenger {
    async fn send(&self, to: &str, body: &str) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            bail!("messaging provider unavailable");
        }
        self.sent.lock().unwrap().push((to.to_string(), body.to_string()));
        Ok(())
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn set_cookie(&self) -> Option<String> {
        self.headers
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    /// `name=value` pair to send back in a `Cookie` header.
    pub fn session_cookie(&self) -> Option<String> {
        self.set_cookie()
            .and_then(|c| c.split(';').next().map(str::to_string))
            .filter(|c| c.starts_with(SESSION_COOKIE))
    }
}

pub struct TestApp {
    pub state: AppState,
    pub billing: Arc<FakeBilling>,
    pub messenger: Arc<FakeMessenger>,
    router: Router,
    next_client: AtomicU32,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config(false))
    }

    pub fn production() -> Self {
        Self::with_config(test_config(true))
    }

    fn with_config(config: AppConfig) -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let billing = Arc::new(FakeBilling::default());
        let messenger = Arc::new(FakeMessenger::default());
        let state: AppState = Arc::new(AppStateInner::with_clients(
            db.clone(),
            config,
            Arc::new(SqliteRateLimitStore::new(db)),
            billing.clone(),
            messenger.clone(),
        ));

        Self {
            router: build_router(state.clone()),
            state,
            billing,
            messenger,
            next_client: AtomicU32::new(1),
        }
    }

    /// Insert a user directly and return their id.
    pub fn user(&self, phone: &str, pin: Option<&str>) -> String {
        let pepper = &self.state.config.hash_pepper;
        let phone = normalize_phone(phone).unwrap();
        let now = Utc::now();
        let row = UserRow {
            id: Uuid::new_v4().to_string(),
            phone_hash: hash_phone(pepper, &phone),
            pin_hash: pin.map(|p| hash_pin(pepper, p)),
            name: Some("Aisyah".into()),
            email: Some(format!("{}@example.com", phone)),
            persona: "friendly".into(),
            created_at: now,
            updated_at: now,
        };
        self.state.db.create_user(&row).unwrap();
        row.id
    }

    /// Cookie header value for a fresh session.
    pub fn session_for(&self, user_id: &str) -> String {
        let token = self.state.sessions.create_session(user_id).unwrap();
        format!("{}={}", SESSION_COOKIE, token)
    }

    /// Give `user_id` a local subscription `sub_test` for customer `cus_test`.
    pub fn subscription(&self, user_id: &str, status: &str, version: i64) {
        self.state
            .db
            .upsert_subscription(
                user_id,
                None,
                "cus_test",
                &SubscriptionSync {
                    stripe_subscription_id: "sub_test",
                    stripe_price_id: Some("price_monthly"),
                    status,
                    current_period_end: Some(1_700_000_000),
                    version,
                },
                Utc::now(),
            )
            .unwrap();
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.send(Method::GET, path, None, &[]).await
    }

    pub async fn get_with_cookie(&self, path: &str, cookie: &str) -> TestResponse {
        self.send(Method::GET, path, None, &[("cookie", cookie)]).await
    }

    pub async fn get_with_headers(&self, path: &str, headers: &[(&str, &str)]) -> TestResponse {
        self.send(Method::GET, path, None, headers).await
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.send(Method::POST, path, Some(body.to_string()), &[]).await
    }

    pub async fn post_with_cookie(&self, path: &str, body: Value, cookie: &str) -> TestResponse {
        self.send(Method::POST, path, Some(body.to_string()), &[("cookie", cookie)])
            .await
    }

    pub async fn post_with_headers(&self, path: &str, body: Value, headers: &[(&str, &str)]) -> TestResponse {
        self.send(Method::POST, path, Some(body.to_string()), headers).await
    }

    pub async fn patch_with_cookie(&self, path: &str, body: Value, cookie: &str) -> TestResponse {
        self.send(Method::PATCH, path, Some(body.to_string()), &[("cookie", cookie)])
            .await
    }

    pub async fn delete_with_cookie(&self, path: &str, cookie: &str) -> TestResponse {
        self.send(Method::DELETE, path, None, &[("cookie", cookie)]).await
    }

    /// Raw webhook delivery; the body must be sent byte-for-byte as signed.
    pub async fn webhook(&self, body: &str, signature: &str) -> TestResponse {
        self.send(
            Method::POST,
            "/api/billing/webhook",
            Some(body.to_string()),
            &[("stripe-signature", signature)],
        )
        .await
    }

    async fn send(&self, method: Method, path: &str, body: Option<String>, headers: &[(&str, &str)]) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(path);

        // Each request looks like a new client unless the test pins one
        if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("x-forwarded-for")) {
            let n = self.next_client.fetch_add(1, Ordering::SeqCst);
            builder = builder.header("x-forwarded-for", format!("10.{}.{}.{}", n >> 16 & 255, n >> 8 & 255, n & 255));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body)),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        TestResponse { status, headers, body }
    }
}

/// Query parameters of the reset link inside a delivered message.
pub fn extract_reset_link(message: &str) -> HashMap<String, String> {
    let start = message.find("reset-pin?").expect("message has a reset link") + "reset-pin?".len();
    message[start..]
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
