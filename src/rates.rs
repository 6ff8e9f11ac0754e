//! Commission rate policy.
//!
//! Rates are fixed program policy, expressed in basis points so commission
//! math stays in integers. All amounts are cents.

use crate::models::CommissionType;

/// Rate paid to the instructor whose code was used on a sale: 25%.
pub const DIRECT_RATE_BPS: i64 = 2_500;
/// Rate paid to that instructor's referring parent on the same sale: 10%.
pub const REFERRAL_RATE_BPS: i64 = 1_000;
/// Flat bonus paid to a parent when a referred instructor's subscription
/// activates or renews: $50.00.
pub const INSTRUCTOR_REFERRAL_BONUS_CENTS: i64 = 5_000;
/// Minimum available balance required to request a payout: $1.00.
pub const MIN_PAYOUT_CENTS: i64 = 100;

/// Basis-point rate applied for a commission type. Flat-bonus types carry
/// rate 0; their amount is the fixed constant instead.
pub fn rate_bps(commission_type: CommissionType) -> i64 {
    match commission_type {
        CommissionType::Direct => DIRECT_RATE_BPS,
        CommissionType::Referral => REFERRAL_RATE_BPS,
        CommissionType::InstructorReferral => 0,
    }
}

/// Commission amount in cents for a base order total.
///
/// Percentage types truncate toward zero; the widening to i128 keeps the
/// intermediate product from overflowing on large totals.
pub fn commission_for(commission_type: CommissionType, base_total_cents: i64) -> i64 {
    match commission_type {
        CommissionType::InstructorReferral => INSTRUCTOR_REFERRAL_BONUS_CENTS,
        _ => apply_bps(base_total_cents, rate_bps(commission_type)),
    }
}

fn apply_bps(amount_cents: i64, bps: i64) -> i64 {
    ((amount_cents as i128 * bps as i128) / 10_000) as i64
}

/// Whether a balance meets the minimum payout threshold.
pub fn meets_payout_minimum(amount_cents: i64) -> bool {
    amount_cents >= MIN_PAYOUT_CENTS
}
