use axum::{
    Router, middleware,
    routing::{delete, get, patch, post},
};

use crate::middleware::{auth_rate_limit, general_rate_limit, require_session, user_auth_rate_limit};
use crate::state::AppState;
use crate::{auth, billing, calendar, feedback, geo, integrations, memories, user, webhook};

/// Every route of the service. CORS and tracing layers are added by the binary.
pub fn build_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/check-pin", post(auth::check_pin))
        .route("/auth/forgot-pin", post(auth::forgot_pin))
        .route("/auth/reset-pin", post(auth::reset_pin))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_rate_limit));

    let public_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/session", get(auth::session))
        .route("/billing/checkout", post(billing::create_checkout))
        .route("/integrations/status", get(integrations::integration_status))
        .route("/geo", get(geo::geo));

    // Checks the current PIN, so it gets the auth policy per user
    let pin_routes = Router::new()
        .route("/user/pin", post(user::set_pin))
        .route_layer(middleware::from_fn_with_state(state.clone(), user_auth_rate_limit));

    let protected_routes = Router::new()
        .route("/billing/cancel", post(billing::cancel_subscription))
        .route("/billing/subscription", get(billing::get_subscription))
        .route("/calendar/events", get(calendar::list_events).post(calendar::create_event))
        .route(
            "/calendar/events/{id}",
            patch(calendar::update_event).delete(calendar::delete_event),
        )
        .route("/reminders", get(calendar::list_reminders))
        .route("/memories", get(memories::list_memories).post(memories::create_memory))
        .route("/memories/{id}", delete(memories::delete_memory))
        .route("/feedback", post(feedback::submit_feedback))
        .route("/integrations/votes", get(integrations::get_votes).post(integrations::toggle_vote))
        .route("/user/profile", get(user::get_profile).patch(user::update_profile))
        .merge(pin_routes)
        .route("/user/account", delete(user::delete_account))
        .route("/user/export", get(user::export_data))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session));

    // The webhook is added after the limiter so provider retries are never throttled
    let api = Router::new()
        .merge(auth_routes)
        .merge(public_routes)
        .merge(protected_routes)
        .layer(middleware::from_fn_with_state(state.clone(), general_rate_limit))
        .route("/billing/webhook", post(webhook::stripe_webhook));

    Router::new()
        .nest("/api", api)
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
