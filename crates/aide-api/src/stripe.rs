use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

const STRIPE_API: &str = "https://api.stripe.com/v1";

/// Subscription object as returned by the billing provider.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSubscription {
    pub id: String,
    pub customer: String,
    pub status: String,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub items: SubscriptionItems,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    pub price: Price,
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    pub id: String,
}

impl RemoteSubscription {
    pub fn price_id(&self) -> Option<&str> {
        self.items.data.first().map(|item| item.price.id.as_str())
    }

    /// Newer API versions report the period on the item instead of the subscription.
    pub fn period_end(&self) -> Option<i64> {
        self.current_period_end
            .or_else(|| self.items.data.first().and_then(|item| item.current_period_end))
    }
}

#[derive(Debug, Clone, Default)]
pub struct CheckoutParams {
    pub price_id: String,
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
    pub client_reference_id: Option<String>,
    pub currency: String,
    pub payment_method_types: Vec<String>,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct List<T> {
    data: Vec<T>,
}

/// External billing provider.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    async fn create_checkout_session(&self, params: &CheckoutParams) -> Result<CheckoutSession>;
    async fn list_subscriptions(&self, customer_id: &str) -> Result<Vec<RemoteSubscription>>;
    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<RemoteSubscription>;
    async fn cancel_at_period_end(&self, subscription_id: &str) -> Result<RemoteSubscription>;
}

pub struct StripeClient {
    client: reqwest::Client,
    secret_key: String,
}

impl StripeClient {
    pub fn new(client: reqwest::Client, secret_key: &str) -> Self {
        Self {
            client,
            secret_key: secret_key.to_string(),
        }
    }

    async fn read<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Stripe returned {}: {}", status, body);
            return Err(anyhow!("Stripe request failed with {}", status));
        }
        Ok(response.json().await?)
    }
}

/// Form fields for a Checkout Session in subscription mode.
pub fn checkout_form(params: &CheckoutParams) -> Vec<(String, String)> {
    let mut form = vec![
        ("mode".to_string(), "subscription".to_string()),
        ("line_items[0][price]".to_string(), params.price_id.clone()),
        ("line_items[0][quantity]".to_string(), "1".to_string()),
        ("success_url".to_string(), params.success_url.clone()),
        ("cancel_url".to_string(), params.cancel_url.clone()),
        ("currency".to_string(), params.currency.clone()),
    ];

    if let Some(customer) = &params.customer_id {
        form.push(("customer".to_string(), customer.clone()));
    } else if let Some(email) = &params.customer_email {
        form.push(("customer_email".to_string(), email.clone()));
    }

    if let Some(reference) = &params.client_reference_id {
        form.push(("client_reference_id".to_string(), reference.clone()));
        form.push(("metadata[user_id]".to_string(), reference.clone()));
    }

    for (i, method) in params.payment_method_types.iter().enumerate() {
        form.push((format!("payment_method_types[{}]", i), method.clone()));
    }

    form
}

#[async_trait]
impl BillingProvider for StripeClient {
    async fn create_checkout_session(&self, params: &CheckoutParams) -> Result<CheckoutSession> {
        let response = self
            .client
            .post(format!("{}/checkout/sessions", STRIPE_API))
            .bearer_auth(&self.secret_key)
            .form(&checkout_form(params))
            .send()
            .await?;
        Self::read(response).await
    }

    async fn list_subscriptions(&self, customer_id: &str) -> Result<Vec<RemoteSubscription>> {
        let response = self
            .client
            .get(format!("{}/subscriptions", STRIPE_API))
            .bearer_auth(&self.secret_key)
            .query(&[("customer", customer_id), ("status", "all"), ("limit", "10")])
            .send()
            .await?;
        let list: List<RemoteSubscription> = Self::read(response).await?;
        Ok(list.data)
    }

    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<RemoteSubscription> {
        let response = self
            .client
            .get(format!("{}/subscriptions/{}", STRIPE_API, subscription_id))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        Self::read(response).await
    }

    async fn cancel_at_period_end(&self, subscription_id: &str) -> Result<RemoteSubscription> {
        let response = self
            .client
            .post(format!("{}/subscriptions/{}", STRIPE_API, subscription_id))
            .bearer_auth(&self.secret_key)
            .form(&[("cancel_at_period_end", "true")])
            .send()
            .await?;
        Self::read(response).await
    }
}

/// The subscription a cancel request applies to: the active one, else the most
/// recent that is not already canceled.
pub fn pick_cancellable(subscriptions: &[RemoteSubscription]) -> Option<&RemoteSubscription> {
    subscriptions
        .iter()
        .find(|s| s.status == "active")
        .or_else(|| {
            subscriptions
                .iter()
                .filter(|s| s.status != "canceled" && s.status != "incomplete_expired")
                .max_by_key(|s| s.created)
        })
}
