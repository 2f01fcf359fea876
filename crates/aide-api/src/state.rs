use std::sync::Arc;

use aide_crypto::encrypt::FieldCipher;
use aide_db::Database;

use crate::config::AppConfig;
use crate::messaging::{LogMessenger, Messenger, TwilioMessenger};
use crate::rate_limit::{self, OnUnavailable, RateLimitStore, RateLimiter, RestRateLimitStore, SqliteRateLimitStore};
use crate::session::SessionManager;
use crate::stripe::{BillingProvider, StripeClient};

pub type AppState = Arc<AppStateInner>;

/// Process-wide clients, built once at startup and shared by every request.
pub struct AppStateInner {
    pub db: Arc<Database>,
    pub config: AppConfig,
    pub sessions: SessionManager,
    pub cipher: FieldCipher,
    pub general_limiter: RateLimiter,
    pub auth_limiter: RateLimiter,
    pub billing: Arc<dyn BillingProvider>,
    pub messenger: Arc<dyn Messenger>,
}

impl AppStateInner {
    /// Wire the production clients from configuration.
    pub fn from_config(db: Arc<Database>, config: AppConfig) -> Self {
        let http = reqwest::Client::new();

        let store: Arc<dyn RateLimitStore> = match &config.rate_limit_backend {
            Some(backend) => Arc::new(RestRateLimitStore::new(http.clone(), &backend.url, &backend.token)),
            None => Arc::new(SqliteRateLimitStore::new(db.clone())),
        };

        let messenger: Arc<dyn Messenger> = match &config.twilio {
            Some(twilio) => Arc::new(TwilioMessenger::new(http.clone(), twilio.clone())),
            None => Arc::new(LogMessenger),
        };

        let billing = Arc::new(StripeClient::new(http, &config.stripe.secret_key));

        Self::with_clients(db, config, store, billing, messenger)
    }

    pub fn with_clients(
        db: Arc<Database>,
        config: AppConfig,
        store: Arc<dyn RateLimitStore>,
        billing: Arc<dyn BillingProvider>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self {
            sessions: SessionManager::new(db.clone(), &config.session_secret),
            cipher: FieldCipher::new(config.memory_key),
            general_limiter: RateLimiter::new(rate_limit::GENERAL, store.clone(), OnUnavailable::Allow),
            auth_limiter: RateLimiter::new(rate_limit::AUTH, store, OnUnavailable::Allow),
            db,
            config,
            billing,
            messenger,
        }
    }
}
