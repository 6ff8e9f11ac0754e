use serde::{Deserialize, Serialize};
use std::fmt;

/// Instructor-program subscription state.
///
/// `inactive` at registration, `active` on first subscription payment
/// (renewals re-affirm it), `canceled` when the subscription is deleted.
/// Cancellation is terminal but the row is never removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructorStatus {
    Inactive,
    Active,
    Canceled,
}

impl InstructorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstructorStatus::Inactive => "inactive",
            InstructorStatus::Active => "active",
            InstructorStatus::Canceled => "canceled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "inactive" => Some(InstructorStatus::Inactive),
            "active" => Some(InstructorStatus::Active),
            "canceled" => Some(InstructorStatus::Canceled),
            _ => None,
        }
    }
}

impl fmt::Display for InstructorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An affiliate account.
///
/// `referral_code` is stored normalized-upper and immutable.
/// `parent_instructor_id` points at the instructor whose code was used at
/// registration; set once, never updated, forming a forest that referral
/// resolution walks exactly one hop up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instructor {
    pub id: String,
    pub user_id: String,
    pub referral_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_instructor_id: Option<String>,
    pub status: InstructorStatus,
    /// Payment-provider customer id (created at registration).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_customer_id: Option<String>,
    /// Payment-provider subscription id (set when the subscription activates).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_subscription_id: Option<String>,
    /// External payout-account id (transfers destination).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout_account_id: Option<String>,
    /// Whether the payout account finished provider-side onboarding.
    pub payouts_enabled: bool,
    /// Instructor session token. Never serialized; returned once at registration.
    #[serde(skip_serializing)]
    pub api_token: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct CreateInstructor {
    pub user_id: String,
    /// Already normalized by the caller.
    pub referral_code: String,
    pub parent_instructor_id: Option<String>,
    pub provider_customer_id: Option<String>,
}
