//! Row-to-model mapping for the ledger tables.
//!
//! Each model implements [`FromRow`] against the column order in its
//! `*_COLS` constant; `query_one` and `query_all` then replace the
//! per-query row closures in `queries`.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum, converting unknown values to rusqlite
/// errors instead of panicking (bad stored values can come from corruption
/// or hand-edited databases).
fn parse_enum<T>(
    row: &Row,
    col: usize,
    col_name: &str,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw = row.get::<_, String>(col)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

fn parse_json_col(row: &Row, col: usize) -> rusqlite::Result<Option<serde_json::Value>> {
    Ok(row
        .get::<_, Option<String>>(col)?
        .and_then(|s| serde_json::from_str(&s).ok()))
}

/// Constructs a model from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Run a query expected to match at most one row.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Run a query and collect every matching row.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const USER_COLS: &str = "id, email, name, locale, created_at, updated_at";

pub const INSTRUCTOR_COLS: &str = "id, user_id, referral_code, parent_instructor_id, status, provider_customer_id, provider_subscription_id, payout_account_id, payouts_enabled, api_token, created_at, updated_at";

pub const ORDER_COLS: &str = "id, user_id, status, total_cents, currency, shipping_address, items, referral_code, provider_session_id, created_at, updated_at";

pub const COMMISSION_COLS: &str = "id, order_id, instructor_id, commission_type, base_total_cents, rate_bps, amount_cents, source_ref, paid_out, payout_request_id, created_at";

pub const PAYOUT_REQUEST_COLS: &str = "id, instructor_id, amount_cents, status, provider_transfer_id, failure_reason, created_at, updated_at";

// ============ FromRow Implementations ============

impl FromRow for User {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            locale: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

impl FromRow for Instructor {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Instructor {
            id: row.get(0)?,
            user_id: row.get(1)?,
            referral_code: row.get(2)?,
            parent_instructor_id: row.get(3)?,
            status: parse_enum(row, 4, "status", InstructorStatus::from_str)?,
            provider_customer_id: row.get(5)?,
            provider_subscription_id: row.get(6)?,
            payout_account_id: row.get(7)?,
            payouts_enabled: row.get::<_, i32>(8)? != 0,
            api_token: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

impl FromRow for Order {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Order {
            id: row.get(0)?,
            user_id: row.get(1)?,
            status: parse_enum(row, 2, "status", OrderStatus::from_str)?,
            total_cents: row.get(3)?,
            currency: row.get(4)?,
            shipping_address: parse_json_col(row, 5)?,
            items: parse_json_col(row, 6)?,
            referral_code: row.get(7)?,
            provider_session_id: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

impl FromRow for Commission {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Commission {
            id: row.get(0)?,
            order_id: row.get(1)?,
            instructor_id: row.get(2)?,
            commission_type: parse_enum(row, 3, "commission_type", CommissionType::from_str)?,
            base_total_cents: row.get(4)?,
            rate_bps: row.get(5)?,
            amount_cents: row.get(6)?,
            source_ref: row.get(7)?,
            paid_out: row.get::<_, i32>(8)? != 0,
            payout_request_id: row.get(9)?,
            created_at: row.get(10)?,
        })
    }
}

impl FromRow for PayoutRequest {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PayoutRequest {
            id: row.get(0)?,
            instructor_id: row.get(1)?,
            amount_cents: row.get(2)?,
            status: parse_enum(row, 3, "status", PayoutStatus::from_str)?,
            provider_transfer_id: row.get(4)?,
            failure_reason: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}
