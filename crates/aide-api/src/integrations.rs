use axum::{Extension, Json, extract::State};
use chrono::Utc;
use tracing::info;

use aide_db::models::VoteOutcome;
use aide_types::api::{
    IntegrationStatus, IntegrationStatusResponse, UserVotesResponse, VoteRequest, VoteResponse,
};

use crate::error::{ApiError, ApiJson};
use crate::middleware::AuthUser;
use crate::state::AppState;

/// Distinct integrations a user may vote for at once.
pub const MAX_VOTES: u32 = 3;

pub struct Integration {
    pub id: &'static str,
    pub name: &'static str,
    pub status: &'static str,
}

pub const CATALOGUE: &[Integration] = &[
    Integration { id: "whatsapp", name: "WhatsApp", status: "live" },
    Integration { id: "google-calendar", name: "Google Calendar", status: "planned" },
    Integration { id: "outlook-calendar", name: "Outlook Calendar", status: "planned" },
    Integration { id: "gmail", name: "Gmail", status: "planned" },
    Integration { id: "notion", name: "Notion", status: "planned" },
    Integration { id: "todoist", name: "Todoist", status: "planned" },
    Integration { id: "slack", name: "Slack", status: "planned" },
    Integration { id: "telegram", name: "Telegram", status: "planned" },
    Integration { id: "spotify", name: "Spotify", status: "planned" },
    Integration { id: "apple-health", name: "Apple Health", status: "planned" },
];

pub fn find_integration(id: &str) -> Option<&'static Integration> {
    CATALOGUE.iter().find(|i| i.id == id)
}

fn remaining(held: usize) -> u32 {
    MAX_VOTES.saturating_sub(u32::try_from(held).unwrap_or(u32::MAX))
}

pub async fn get_votes(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<UserVotesResponse>, ApiError> {
    let votes = state.db.get_user_votes(&auth.user_id)?;
    Ok(Json(UserVotesResponse {
        remaining_votes: remaining(votes.len()),
        votes,
    }))
}

/// Toggle the caller's vote for one integration.
pub async fn toggle_vote(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(req): ApiJson<VoteRequest>,
) -> Result<Json<VoteResponse>, ApiError> {
    let integration = find_integration(&req.integration_id)
        .ok_or_else(|| ApiError::validation("Unknown integration"))?;

    let outcome = state
        .db
        .toggle_vote(&auth.user_id, integration.id, MAX_VOTES, Utc::now())?;
    let (voted, count, held) = match outcome {
        VoteOutcome::Added { count, held } => (true, count, held),
        VoteOutcome::Removed { count, held } => (false, count, held),
        VoteOutcome::LimitReached => {
            return Err(ApiError::validation(format!(
                "Vote limit reached: you can vote for up to {} integrations",
                MAX_VOTES
            )));
        }
    };

    info!(
        "User {} {} {} ({} votes)",
        auth.user_id,
        if voted { "voted for" } else { "withdrew vote for" },
        integration.id,
        count
    );

    Ok(Json(VoteResponse {
        voted,
        count,
        remaining_votes: MAX_VOTES.saturating_sub(held),
    }))
}

pub async fn integration_status(
    State(state): State<AppState>,
) -> Result<Json<IntegrationStatusResponse>, ApiError> {
    let counts = state.db.vote_counts()?;
    Ok(Json(IntegrationStatusResponse {
        integrations: CATALOGUE
            .iter()
            .map(|i| IntegrationStatus {
                id: i.id.to_string(),
                name: i.name.to_string(),
                status: i.status.to_string(),
                votes: counts.get(i.id).copied().unwrap_or(0),
            })
            .collect(),
    }))
}
