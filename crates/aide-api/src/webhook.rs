use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::Sha256;
use tracing::{debug, info, warn};

use aide_db::subscriptions::SubscriptionSync;
use aide_types::models::SubscriptionStatus;

use crate::error::ApiError;
use crate::state::AppState;
use crate::stripe::RemoteSubscription;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed webhook, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Deserialize)]
struct Event {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    created: i64,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: Value,
}

#[derive(Debug, Deserialize)]
struct CompletedCheckout {
    id: String,
    customer: Option<String>,
    subscription: Option<String>,
    client_reference_id: Option<String>,
    customer_email: Option<String>,
    customer_details: Option<CustomerDetails>,
    #[serde(default)]
    metadata: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct CustomerDetails {
    email: Option<String>,
}

/// Check a `Stripe-Signature` header (`t=...,v1=...`) against the raw body.
pub fn verify_signature(secret: &str, header: &str, payload: &[u8], now: i64) -> bool {
    if secret.is_empty() {
        return false;
    }

    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", t)) => timestamp = t.parse::<i64>().ok(),
            Some(("v1", sig)) => signatures.push(sig),
            _ => {}
        }
    }

    let Some(timestamp) = timestamp else {
        return false;
    };
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return false;
    }

    signatures.into_iter().any(|sig| {
        let Ok(expected) = hex::decode(sig) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    })
}

/// Authoritative subscription sync. Each event carries its `created` time as
/// the version, so late or replayed events never overwrite newer state.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !verify_signature(
        &state.config.stripe.webhook_secret,
        signature,
        &body,
        Utc::now().timestamp(),
    ) {
        warn!("Rejected webhook with invalid signature");
        return Err(ApiError::validation("Invalid signature"));
    }

    let event: Event = serde_json::from_slice(&body)
        .map_err(|e| ApiError::validation(format!("Invalid event payload: {}", e)))?;
    debug!("Webhook {} ({})", event.id, event.kind);

    match event.kind.as_str() {
        "checkout.session.completed" => {
            let checkout: CompletedCheckout = parse_object(event.data.object)?;
            checkout_completed(&state, checkout, event.created).await?;
        }
        "customer.subscription.created" | "customer.subscription.updated" => {
            let remote: RemoteSubscription = parse_object(event.data.object)?;
            match SubscriptionStatus::from_remote(&remote.status, remote.cancel_at_period_end) {
                Some(status) => apply_remote(&state, &remote, status, event.created)?,
                None => warn!("Subscription {} has unknown status '{}'", remote.id, remote.status),
            }
        }
        "customer.subscription.deleted" => {
            let remote: RemoteSubscription = parse_object(event.data.object)?;
            apply_remote(&state, &remote, SubscriptionStatus::Canceled, event.created)?;
        }
        other => debug!("Ignoring webhook event type {}", other),
    }

    Ok(Json(json!({ "received": true })))
}

fn parse_object<T: for<'de> Deserialize<'de>>(object: Value) -> Result<T, ApiError> {
    serde_json::from_value(object).map_err(|e| ApiError::validation(format!("Invalid event object: {}", e)))
}

async fn checkout_completed(state: &AppState, checkout: CompletedCheckout, version: i64) -> Result<(), ApiError> {
    let email = checkout
        .customer_details
        .and_then(|d| d.email)
        .or(checkout.customer_email)
        .map(|e| e.trim().to_ascii_lowercase());

    let user_id = match checkout
        .client_reference_id
        .or_else(|| checkout.metadata.get("user_id").cloned())
    {
        Some(id) => state.db.get_user_by_id(&id)?.map(|u| u.id),
        None => match &email {
            Some(email) => state.db.get_user_by_email(email)?.map(|u| u.id),
            None => None,
        },
    };

    let (Some(user_id), Some(customer), Some(subscription_id)) =
        (user_id, checkout.customer, checkout.subscription)
    else {
        warn!("Checkout {} completed without a resolvable user or subscription", checkout.id);
        return Ok(());
    };

    let remote = state
        .billing
        .retrieve_subscription(&subscription_id)
        .await
        .map_err(ApiError::Upstream)?;
    let status = SubscriptionStatus::from_remote(&remote.status, remote.cancel_at_period_end)
        .unwrap_or(SubscriptionStatus::Incomplete);

    let applied = state.db.upsert_subscription(
        &user_id,
        email.as_deref(),
        &customer,
        &SubscriptionSync {
            stripe_subscription_id: &remote.id,
            stripe_price_id: remote.price_id(),
            status: status.as_str(),
            current_period_end: remote.period_end(),
            version,
        },
        Utc::now(),
    )?;

    if applied {
        info!("Subscription {} linked to user {} ({})", remote.id, user_id, status);
    } else {
        debug!("Stale checkout event for user {}", user_id);
    }
    Ok(())
}

fn apply_remote(
    state: &AppState,
    remote: &RemoteSubscription,
    status: SubscriptionStatus,
    version: i64,
) -> Result<(), ApiError> {
    let applied = state.db.sync_subscription(
        &SubscriptionSync {
            stripe_subscription_id: &remote.id,
            stripe_price_id: remote.price_id(),
            status: status.as_str(),
            current_period_end: remote.period_end(),
            version,
        },
        Utc::now(),
    )?;

    if applied {
        info!("Subscription {} is now {}", remote.id, status);
    } else {
        debug!("Subscription {} event ignored (stale or untracked)", remote.id);
    }
    Ok(())
}
