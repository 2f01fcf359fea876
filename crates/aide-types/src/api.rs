use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Persona, ReminderStatus, SubscriptionStatus};

/// Success envelope used by the dashboard resource routes.
#[derive(Debug, Serialize)]
pub struct DataEnvelope<T> {
    pub data: T,
}

impl<T> DataEnvelope<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub phone: String,
    pub pin: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub phone: String,
    pub pin: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: UserSummary,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSummary>,
}

/// Body of check-pin and forgot-pin.
#[derive(Debug, Deserialize)]
pub struct PhoneRequest {
    pub phone: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckPinResponse {
    pub has_pin: bool,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ForgotPinResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPinRequest {
    pub token: String,
    pub phone: String,
    pub user_id: String,
    pub expires: i64,
    pub new_pin: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPinRequest {
    pub current_pin: Option<String>,
    pub new_pin: String,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

// -- Billing --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub billing_cycle: String,
    pub country: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub success: bool,
    pub message: String,
    pub current_period_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionView {
    pub plan: String,
    pub status: SubscriptionStatus,
    pub cancel_at_period_end: bool,
    pub current_period_end: Option<DateTime<Utc>>,
    pub price_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub subscription: Option<SubscriptionView>,
}

#[derive(Debug, Serialize)]
pub struct GeoResponse {
    pub country: String,
    pub currency: String,
}

// -- Calendar --

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub timezone: String,
    pub all_day: bool,
    pub reminder_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventRequest {
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub timezone: Option<String>,
    #[serde(default)]
    pub all_day: bool,
    #[serde(default)]
    pub reminder: bool,
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEventRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub timezone: Option<String>,
    pub all_day: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub id: Uuid,
    pub message: String,
    pub reminder_time: DateTime<Utc>,
    pub status: ReminderStatus,
    pub created_at: DateTime<Utc>,
}

// -- Memories --

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMemoryRequest {
    pub title: String,
    pub content: String,
}

// -- Feedback --

#[derive(Debug, Deserialize)]
pub struct CreateFeedbackRequest {
    pub category: Option<String>,
    pub message: String,
    pub rating: Option<u8>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub id: Uuid,
    pub category: String,
    pub message: String,
    pub rating: Option<u8>,
    pub created_at: DateTime<Utc>,
}

// -- Integrations --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub integration_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    pub voted: bool,
    pub count: u32,
    pub remaining_votes: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserVotesResponse {
    pub votes: Vec<String>,
    pub remaining_votes: u32,
}

#[derive(Debug, Serialize)]
pub struct IntegrationStatus {
    pub id: String,
    pub name: String,
    pub status: String,
    pub votes: u32,
}

#[derive(Debug, Serialize)]
pub struct IntegrationStatusResponse {
    pub integrations: Vec<IntegrationStatus>,
}

// -- User --

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
    pub persona: Persona,
    pub has_pin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub persona: Option<String>,
}

/// Downloadable account export.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserExport {
    pub exported_at: DateTime<Utc>,
    pub profile: UserProfile,
    pub calendar_events: Vec<CalendarEvent>,
    pub reminders: Vec<Reminder>,
    pub memories: Vec<Memory>,
    pub feedback: Vec<Feedback>,
    pub integration_votes: Vec<String>,
    pub subscription: Option<SubscriptionView>,
}
