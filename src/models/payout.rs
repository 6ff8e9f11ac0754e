use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a payout request.
///
/// Created `processing` (the reservation), resolved to `completed` or
/// `failed`. Terminal either way; a retry is a new request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Processing,
    Completed,
    Failed,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Processing => "processing",
            PayoutStatus::Completed => "completed",
            PayoutStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(PayoutStatus::Processing),
            "completed" => Some(PayoutStatus::Completed),
            "failed" => Some(PayoutStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A request to move an instructor's earned-but-unpaid balance to their
/// external payout account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub id: String,
    pub instructor_id: String,
    /// Reserved amount: the available balance at reservation time.
    pub amount_cents: i64,
    pub status: PayoutStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_transfer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Filters for payout-request listings.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct PayoutFilters {
    pub status: Option<PayoutStatus>,
}
