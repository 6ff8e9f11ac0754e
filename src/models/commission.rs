use serde::{Deserialize, Serialize};
use std::fmt;

/// What a ledger entry pays for.
///
/// `direct` and `referral` are percentage cuts of one order; a single order
/// carries at most one of each. `instructor_referral` is the flat bonus a
/// parent earns when a referred instructor's subscription activates or
/// renews (no order attached).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionType {
    Direct,
    Referral,
    InstructorReferral,
}

impl CommissionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionType::Direct => "direct",
            CommissionType::Referral => "referral",
            CommissionType::InstructorReferral => "instructor_referral",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(CommissionType::Direct),
            "referral" => Some(CommissionType::Referral),
            "instructor_referral" => Some(CommissionType::InstructorReferral),
            _ => None,
        }
    }
}

impl fmt::Display for CommissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One append-only ledger entry attributing money to one instructor from
/// one triggering event. Immutable after insert except for the payout
/// linkage (`payout_request_id`) and the `paid_out` flip when a payout
/// completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commission {
    pub id: String,
    /// Absent for subscription bonuses and for the degraded path where the
    /// order write failed but attribution was preserved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    pub instructor_id: String,
    pub commission_type: CommissionType,
    /// Order total the rate was applied to (0 for flat bonuses).
    pub base_total_cents: i64,
    /// Basis points applied (0 for flat bonuses).
    pub rate_bps: i64,
    pub amount_cents: i64,
    /// Provider-side cause: checkout session id for order commissions,
    /// subscription id for activation bonuses, invoice id for renewal
    /// bonuses. Unique per (instructor, type), which is the replay guard.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
    pub paid_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout_request_id: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct CreateCommission {
    pub order_id: Option<String>,
    pub instructor_id: String,
    pub commission_type: CommissionType,
    pub base_total_cents: i64,
    pub rate_bps: i64,
    pub amount_cents: i64,
    pub source_ref: Option<String>,
}

/// Filters for commission listings.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CommissionFilters {
    pub paid_out: Option<bool>,
}

/// Derived earnings aggregate for one instructor. Never stored; recomputed
/// from the commissions and payout_requests tables on every read.
#[derive(Debug, Clone, Serialize)]
pub struct EarningsSummary {
    pub total_earned_cents: i64,
    pub direct_cents: i64,
    pub referral_cents: i64,
    pub instructor_referral_cents: i64,
    pub paid_out_cents: i64,
    /// Sum of payout requests currently `processing`.
    pub pending_payout_cents: i64,
    /// Unpaid commissions minus processing reservations, floored at zero.
    pub available_cents: i64,
}
