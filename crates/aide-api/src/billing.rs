use axum::{Extension, Json, extract::State};
use axum_extra::extract::CookieJar;
use chrono::Utc;
use tracing::{info, warn};

use aide_types::api::{
    CancelResponse, CheckoutRequest, CheckoutResponse, SubscriptionResponse,
};
use aide_types::models::SubscriptionStatus;

use crate::auth::normalize_email;
use crate::error::{ApiError, ApiJson};
use crate::middleware::{AuthUser, session_user};
use crate::plans::{currency_for_country, payment_methods, plan_for_cycle};
use crate::state::AppState;
use crate::stripe::{CheckoutParams, pick_cancellable};
use crate::views::{subscription_view, unix_to_datetime};

/// Start a hosted checkout. The buyer is the session user when there is one,
/// otherwise the email supplied by the client.
pub async fn create_checkout(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiJson(req): ApiJson<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let plan = plan_for_cycle(&state.config.stripe, &req.billing_cycle)
        .ok_or_else(|| ApiError::validation("Invalid billing cycle"))?;

    let user = match session_user(&state, &jar) {
        Some(session) => state.db.get_user_by_id(&session.user_id)?,
        None => None,
    };
    let email = match normalize_email(req.email.as_deref())? {
        Some(email) => Some(email),
        None => user.as_ref().and_then(|u| u.email.clone()),
    };
    if user.is_none() && email.is_none() {
        return Err(ApiError::validation("An email address or a signed-in account is required"));
    }

    let mut customer_id = match &user {
        Some(user) => state
            .db
            .get_subscription_by_user(&user.id)?
            .and_then(|s| s.stripe_customer_id),
        None => None,
    };
    if customer_id.is_none() {
        if let Some(email) = &email {
            customer_id = state.db.find_customer_id_by_email(email)?;
        }
    }

    let currency = currency_for_country(req.country.as_deref().unwrap_or("US"));
    let public_url = &state.config.public_url;
    let params = CheckoutParams {
        price_id: plan.price_id,
        customer_email: if customer_id.is_none() { email } else { None },
        customer_id,
        client_reference_id: user.as_ref().map(|u| u.id.clone()),
        currency: currency.to_string(),
        payment_method_types: payment_methods(currency).iter().map(|m| m.to_string()).collect(),
        success_url: format!("{}/dashboard?checkout=success", public_url),
        cancel_url: format!("{}/pricing?checkout=cancelled", public_url),
    };

    let session = state
        .billing
        .create_checkout_session(&params)
        .await
        .map_err(ApiError::Upstream)?;
    let url = session
        .url
        .ok_or_else(|| ApiError::Upstream(anyhow::anyhow!("checkout session {} has no url", session.id)))?;

    info!("Checkout session {} created ({} {})", session.id, plan.billing_cycle, currency);
    Ok(Json(CheckoutResponse { url }))
}

/// Cancel at period end. Already-cancelled subscriptions are a conflict and
/// are left untouched.
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<CancelResponse>, ApiError> {
    let local = state
        .db
        .get_subscription_by_user(&auth.user_id)?
        .ok_or(ApiError::NotFound)?;

    let status: SubscriptionStatus = local
        .status
        .parse()
        .map_err(|e: String| ApiError::Internal(anyhow::anyhow!(e)))?;
    if status.is_cancelled_or_pending() {
        return Err(ApiError::Conflict("Subscription is already canceled".into()));
    }

    let customer_id = local.stripe_customer_id.as_deref().ok_or(ApiError::NotFound)?;
    let remote = state
        .billing
        .list_subscriptions(customer_id)
        .await
        .map_err(ApiError::Upstream)?;
    let target = pick_cancellable(&remote).ok_or(ApiError::NotFound)?;

    let cancelled = state
        .billing
        .cancel_at_period_end(&target.id)
        .await
        .map_err(ApiError::Upstream)?;
    let period_end = cancelled.period_end().or(local.current_period_end);

    let now = Utc::now();
    let written = state.db.set_subscription_status(
        &auth.user_id,
        SubscriptionStatus::CancelAtPeriodEnd.as_str(),
        period_end,
        now.timestamp(),
        now,
    )?;
    if !written {
        warn!("Cancel for user {} was superseded by a newer subscription update", auth.user_id);
    }

    info!("Subscription {} set to cancel at period end", target.id);
    Ok(Json(CancelResponse {
        success: true,
        message: "Your subscription will be canceled at the end of the current billing period".into(),
        current_period_end: period_end.and_then(unix_to_datetime),
    }))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let subscription = state.db.get_subscription_by_user(&auth.user_id)?;
    Ok(Json(SubscriptionResponse {
        subscription: subscription.map(|row| subscription_view(&row, &state.config.stripe)),
    }))
}
