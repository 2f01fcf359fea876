use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Local subscription status.
///
/// Mirrors the billing provider's vocabulary, plus `CancelAtPeriodEnd`, which
/// only exists locally: the subscription is still active but will not renew.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    CancelAtPeriodEnd,
    Canceled,
    Trialing,
    PastDue,
    Incomplete,
    IncompleteExpired,
    Unpaid,
    Paused,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::CancelAtPeriodEnd => "cancel_at_period_end",
            Self::Canceled => "canceled",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Unpaid => "unpaid",
            Self::Paused => "paused",
        }
    }

    /// Map a remote status plus its `cancel_at_period_end` flag to the local status.
    pub fn from_remote(status: &str, cancel_at_period_end: bool) -> Option<Self> {
        let parsed: Self = status.parse().ok()?;
        Some(match parsed {
            Self::Active if cancel_at_period_end => Self::CancelAtPeriodEnd,
            other => other,
        })
    }

    /// Status shown to the user: `CancelAtPeriodEnd` is still "active".
    pub fn display(&self) -> (Self, bool) {
        match self {
            Self::CancelAtPeriodEnd => (Self::Active, true),
            other => (*other, false),
        }
    }

    /// True when a cancel request would be a no-op.
    pub fn is_cancelled_or_pending(&self) -> bool {
        matches!(self, Self::Canceled | Self::CancelAtPeriodEnd)
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "active" => Self::Active,
            "cancel_at_period_end" => Self::CancelAtPeriodEnd,
            "canceled" => Self::Canceled,
            "trialing" => Self::Trialing,
            "past_due" => Self::PastDue,
            "incomplete" => Self::Incomplete,
            "incomplete_expired" => Self::IncompleteExpired,
            "unpaid" => Self::Unpaid,
            "paused" => Self::Paused,
            other => return Err(format!("unknown subscription status: {other}")),
        })
    }
}

/// Assistant tone chosen by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    Friendly,
    Professional,
    Concise,
    Playful,
}

impl Persona {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Friendly => "friendly",
            Self::Professional => "professional",
            Self::Concise => "concise",
            Self::Playful => "playful",
        }
    }
}

impl FromStr for Persona {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "friendly" => Ok(Self::Friendly),
            "professional" => Ok(Self::Professional),
            "concise" => Ok(Self::Concise),
            "playful" => Ok(Self::Playful),
            other => Err(format!("unknown persona: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    Pending,
    Sent,
    Cancelled,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for ReminderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown reminder status: {other}")),
        }
    }
}
