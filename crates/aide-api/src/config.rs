use std::net::IpAddr;

use anyhow::{Context, Result, bail};

/// Placeholder secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub price_monthly: String,
    pub price_yearly: String,
}

#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from: String,
}

/// REST key-value backend for the rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimitBackendConfig {
    pub url: String,
    pub token: String,
}

/// Which forwarding headers may identify the client.
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    /// Honour `x-forwarded-for`/`x-real-ip` at all. Off means the socket peer
    /// is the client.
    pub trust_forwarded: bool,
    /// Hops appended by our own proxies, skipped when reading the chain from
    /// the right.
    pub trusted_hops: Vec<IpAddr>,
}

impl ProxyConfig {
    pub fn is_trusted_hop(&self, ip: &IpAddr) -> bool {
        self.trusted_hops.contains(ip)
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    pub session_secret: String,
    pub hash_pepper: String,
    pub memory_key: [u8; 32],
    pub public_url: String,
    pub production: bool,
    pub proxy: ProxyConfig,
    pub stripe: StripeConfig,
    pub rate_limit_backend: Option<RateLimitBackendConfig>,
    pub twilio: Option<TwilioConfig>,
}

impl AppConfig {
    /// Read configuration from the process environment (after `.env` is loaded).
    pub fn from_env() -> Result<Self> {
        let session_secret = env_or("AIDE_SESSION_SECRET", "");
        if session_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&session_secret.as_str()) {
            bail!("AIDE_SESSION_SECRET is unset or still a placeholder");
        }

        let memory_key = aide_crypto::keys::key_from_base64(&env_or("AIDE_MEMORY_KEY", ""))
            .context("AIDE_MEMORY_KEY must be a base64-encoded 32-byte key")?;

        let port: u16 = env_or("AIDE_PORT", "3000")
            .parse()
            .context("AIDE_PORT is not a valid port")?;

        let trusted_hops = env_or("AIDE_TRUSTED_PROXIES", "")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<IpAddr>()
                    .with_context(|| format!("AIDE_TRUSTED_PROXIES entry {:?} is not an IP address", s))
            })
            .collect::<Result<Vec<_>>>()?;
        let proxy = ProxyConfig {
            trust_forwarded: env_or("AIDE_TRUST_PROXY", "false") == "true",
            trusted_hops,
        };

        let rate_limit_backend = match (
            std::env::var("AIDE_RATE_LIMIT_URL").ok(),
            std::env::var("AIDE_RATE_LIMIT_TOKEN").ok(),
        ) {
            (Some(url), Some(token)) if !url.is_empty() => Some(RateLimitBackendConfig { url, token }),
            _ => None,
        };

        let twilio = match (
            std::env::var("TWILIO_ACCOUNT_SID").ok(),
            std::env::var("TWILIO_AUTH_TOKEN").ok(),
            std::env::var("TWILIO_FROM").ok(),
        ) {
            (Some(account_sid), Some(auth_token), Some(from)) if !account_sid.is_empty() => {
                Some(TwilioConfig {
                    account_sid,
                    auth_token,
                    from,
                })
            }
            _ => None,
        };

        Ok(Self {
            host: env_or("AIDE_HOST", "0.0.0.0"),
            port,
            db_path: env_or("AIDE_DB_PATH", "aide.db"),
            session_secret,
            hash_pepper: env_or("AIDE_HASH_PEPPER", ""),
            memory_key,
            public_url: env_or("AIDE_PUBLIC_URL", "http://localhost:3000")
                .trim_end_matches('/')
                .to_string(),
            production: env_or("AIDE_ENV", "development") == "production",
            proxy,
            stripe: StripeConfig {
                secret_key: env_or("STRIPE_SECRET_KEY", ""),
                webhook_secret: env_or("STRIPE_WEBHOOK_SECRET", ""),
                price_monthly: env_or("STRIPE_PRICE_MONTHLY", ""),
                price_yearly: env_or("STRIPE_PRICE_YEARLY", ""),
            },
            rate_limit_backend,
            twilio,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}
