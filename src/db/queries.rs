use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params, types::Value};
use uuid::Uuid;

use crate::error::{AppError, Result, msg};
use crate::models::*;
use crate::rates::MIN_PAYOUT_CENTS;
use crate::util::SECONDS_PER_DAY;

use super::from_row::{
    COMMISSION_COLS, INSTRUCTOR_COLS, ORDER_COLS, PAYOUT_REQUEST_COLS, USER_COLS, query_all,
    query_one,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

pub fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate an instructor API token. Two UUIDs worth of randomness behind a
/// recognizable prefix so leaked tokens are easy to grep for in logs.
fn gen_api_token() -> String {
    format!(
        "kb_{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

/// Builder for dynamic UPDATE statements with optional fields.
/// Combines multiple field updates into a single query for efficiency.
struct UpdateBuilder {
    table: &'static str,
    id: String,
    fields: Vec<(&'static str, Value)>,
    track_updated_at: bool,
}

impl UpdateBuilder {
    fn new(table: &'static str, id: &str) -> Self {
        Self {
            table,
            id: id.to_string(),
            fields: Vec::new(),
            track_updated_at: false,
        }
    }

    fn with_updated_at(mut self) -> Self {
        self.track_updated_at = true;
        self
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    /// Set a column to an explicit value (including NULL).
    /// Use this for Option<T> where Some(v) = set to v, None = set to NULL.
    fn set_nullable<V: Into<Value>>(mut self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.fields.push((column, v.into())),
            None => self.fields.push((column, Value::Null)),
        }
        self
    }

    fn execute(mut self, conn: &Connection) -> Result<bool> {
        if self.fields.is_empty() {
            return Ok(false);
        }
        if self.track_updated_at {
            self.fields.push(("updated_at", now().into()));
        }
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        let sql = format!("UPDATE {} SET {} WHERE id = ?", self.table, sets.join(", "));
        let affected = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(affected > 0)
    }

    /// Execute the update and return the updated entity using RETURNING clause.
    /// Returns None if no rows matched (entity not found or no fields to update).
    fn execute_returning<T: super::from_row::FromRow>(
        mut self,
        conn: &Connection,
        returning_cols: &str,
    ) -> Result<Option<T>> {
        if self.fields.is_empty() {
            return Ok(None);
        }
        if self.track_updated_at {
            self.fields.push(("updated_at", now().into()));
        }
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ? RETURNING {}",
            self.table,
            sets.join(", "),
            returning_cols
        );
        conn.query_row(&sql, rusqlite::params_from_iter(values), T::from_row)
            .optional()
            .map_err(Into::into)
    }
}

// ============ Users ============

/// Create a user. Email is normalized to lowercase before insertion.
pub fn create_user(conn: &Connection, input: &CreateUser) -> Result<User> {
    let id = gen_id();
    let now = now();
    let email = input.email.trim().to_lowercase();

    conn.execute(
        "INSERT INTO users (id, email, name, locale, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![&id, &email, &input.name, &input.locale, now, now],
    )?;

    Ok(User {
        id,
        email,
        name: input.name.clone(),
        locale: input.locale.clone(),
        created_at: now,
        updated_at: now,
    })
}

pub fn get_user_by_id(conn: &Connection, id: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLS),
        &[&id],
    )
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    let email = email.trim().to_lowercase();
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE email = ?1", USER_COLS),
        &[&email],
    )
}

/// Look up a user by email, creating one if none exists.
///
/// Uses INSERT OR IGNORE against the unique email constraint so two
/// concurrent callers converge on the same row instead of racing a
/// SELECT-then-INSERT. Safe to call inside a transaction.
pub fn get_or_create_user(
    conn: &Connection,
    email: &str,
    name: Option<&str>,
    locale: Option<&str>,
) -> Result<User> {
    let email = email.trim().to_lowercase();
    conn.execute(
        "INSERT OR IGNORE INTO users (id, email, name, locale, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![gen_id(), &email, name, locale, now(), now()],
    )?;

    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE email = ?1", USER_COLS),
        &[&email],
    )?
    .ok_or_else(|| AppError::Internal(format!("user row missing after upsert: {}", email)))
}

// ============ Instructors ============

/// Create an instructor. The referral code must already be normalized
/// (uppercase, validated) by the caller. A fresh API token is generated here
/// and returned on the struct exactly once; it is never serialized afterwards.
pub fn create_instructor(conn: &Connection, input: &CreateInstructor) -> Result<Instructor> {
    let id = gen_id();
    let now = now();
    let api_token = gen_api_token();

    conn.execute(
        "INSERT INTO instructors (id, user_id, referral_code, parent_instructor_id, status,
                                  provider_customer_id, provider_subscription_id, payout_account_id,
                                  payouts_enabled, api_token, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, NULL, 0, ?7, ?8, ?9)",
        params![
            &id,
            &input.user_id,
            &input.referral_code,
            &input.parent_instructor_id,
            InstructorStatus::Inactive.as_str(),
            &input.provider_customer_id,
            &api_token,
            now,
            now
        ],
    )?;

    Ok(Instructor {
        id,
        user_id: input.user_id.clone(),
        referral_code: input.referral_code.clone(),
        parent_instructor_id: input.parent_instructor_id.clone(),
        status: InstructorStatus::Inactive,
        provider_customer_id: input.provider_customer_id.clone(),
        provider_subscription_id: None,
        payout_account_id: None,
        payouts_enabled: false,
        api_token,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_instructor_by_id(conn: &Connection, id: &str) -> Result<Option<Instructor>> {
    query_one(
        conn,
        &format!("SELECT {} FROM instructors WHERE id = ?1", INSTRUCTOR_COLS),
        &[&id],
    )
}

/// Look up an instructor by normalized referral code.
pub fn get_instructor_by_referral_code(conn: &Connection, code: &str) -> Result<Option<Instructor>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM instructors WHERE referral_code = ?1",
            INSTRUCTOR_COLS
        ),
        &[&code],
    )
}

pub fn get_instructor_by_api_token(conn: &Connection, token: &str) -> Result<Option<Instructor>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM instructors WHERE api_token = ?1",
            INSTRUCTOR_COLS
        ),
        &[&token],
    )
}

pub fn get_instructor_by_user_id(conn: &Connection, user_id: &str) -> Result<Option<Instructor>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM instructors WHERE user_id = ?1",
            INSTRUCTOR_COLS
        ),
        &[&user_id],
    )
}

pub fn get_instructor_by_subscription(
    conn: &Connection,
    subscription_id: &str,
) -> Result<Option<Instructor>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM instructors WHERE provider_subscription_id = ?1",
            INSTRUCTOR_COLS
        ),
        &[&subscription_id],
    )
}

pub fn get_instructor_by_customer(
    conn: &Connection,
    customer_id: &str,
) -> Result<Option<Instructor>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM instructors WHERE provider_customer_id = ?1",
            INSTRUCTOR_COLS
        ),
        &[&customer_id],
    )
}

pub fn list_instructors(
    conn: &Connection,
    status: Option<InstructorStatus>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Instructor>, i64)> {
    let mut where_clause = String::from("WHERE 1=1");
    if status.is_some() {
        where_clause.push_str(" AND status = ?");
    }

    let filter_params = || -> Vec<Box<dyn rusqlite::ToSql>> {
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(s) = status {
            params.push(Box::new(s.as_str().to_string()));
        }
        params
    };

    let count_params = filter_params();
    let count_refs: Vec<&dyn rusqlite::ToSql> = count_params.iter().map(|b| b.as_ref()).collect();
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM instructors {}", where_clause),
        count_refs.as_slice(),
        |row| row.get(0),
    )?;

    let mut select_params = filter_params();
    select_params.push(Box::new(limit));
    select_params.push(Box::new(offset));
    let select_refs: Vec<&dyn rusqlite::ToSql> = select_params.iter().map(|b| b.as_ref()).collect();

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM instructors {} ORDER BY created_at DESC LIMIT ? OFFSET ?",
        INSTRUCTOR_COLS, where_clause
    ))?;
    let instructors = stmt
        .query_map(select_refs.as_slice(), super::from_row::FromRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok((instructors, total))
}

/// Transition an instructor to active and attach the billing identifiers
/// from the completed subscription checkout. Idempotent: re-running with the
/// same identifiers leaves the row unchanged apart from updated_at.
pub fn activate_instructor(
    conn: &Connection,
    id: &str,
    subscription_id: &str,
    customer_id: Option<&str>,
) -> Result<bool> {
    UpdateBuilder::new("instructors", id)
        .with_updated_at()
        .set("status", InstructorStatus::Active.as_str().to_string())
        .set("provider_subscription_id", subscription_id.to_string())
        .set_opt("provider_customer_id", customer_id.map(String::from))
        .execute(conn)
}

pub fn set_instructor_status(conn: &Connection, id: &str, status: InstructorStatus) -> Result<bool> {
    UpdateBuilder::new("instructors", id)
        .with_updated_at()
        .set("status", status.as_str().to_string())
        .execute(conn)
}

/// Store the connected payout account and its onboarding state.
pub fn set_instructor_payout_account(
    conn: &Connection,
    id: &str,
    account_id: &str,
    payouts_enabled: bool,
) -> Result<Option<Instructor>> {
    UpdateBuilder::new("instructors", id)
        .with_updated_at()
        .set("payout_account_id", account_id.to_string())
        .set("payouts_enabled", payouts_enabled as i32)
        .execute_returning(conn, INSTRUCTOR_COLS)
}

// ============ Orders ============

/// Create an order unconditionally. Webhook-driven creation should go through
/// [`try_create_order`] instead, which is idempotent on the provider session.
pub fn create_order(conn: &Connection, input: &CreateOrder) -> Result<Order> {
    let id = gen_id();
    let now = now();
    let shipping_json = input.shipping_address.as_ref().map(|v| v.to_string());
    let items_json = input.items.as_ref().map(|v| v.to_string());

    conn.execute(
        "INSERT INTO orders (id, user_id, status, total_cents, currency, shipping_address,
                             items, referral_code, provider_session_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            &id,
            &input.user_id,
            OrderStatus::Confirmed.as_str(),
            input.total_cents,
            &input.currency,
            &shipping_json,
            &items_json,
            &input.referral_code,
            &input.provider_session_id,
            now,
            now
        ],
    )?;

    Ok(Order {
        id,
        user_id: input.user_id.clone(),
        status: OrderStatus::Confirmed,
        total_cents: input.total_cents,
        currency: input.currency.clone(),
        shipping_address: input.shipping_address.clone(),
        items: input.items.clone(),
        referral_code: input.referral_code.clone(),
        provider_session_id: input.provider_session_id.clone(),
        created_at: now,
        updated_at: now,
    })
}

/// Atomically create an order for a provider checkout session, returning
/// whether this call won the claim.
///
/// Uses INSERT OR IGNORE against the unique provider_session_id index so a
/// redelivered completion event cannot produce a second order. Returns:
/// - `Ok(Some(order))` if this call created the order
/// - `Ok(None)` if an order for this session already exists
pub fn try_create_order(conn: &Connection, input: &CreateOrder) -> Result<Option<Order>> {
    let id = gen_id();
    let now = now();
    let shipping_json = input.shipping_address.as_ref().map(|v| v.to_string());
    let items_json = input.items.as_ref().map(|v| v.to_string());

    let affected = conn.execute(
        "INSERT OR IGNORE INTO orders (id, user_id, status, total_cents, currency, shipping_address,
                                       items, referral_code, provider_session_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            &id,
            &input.user_id,
            OrderStatus::Confirmed.as_str(),
            input.total_cents,
            &input.currency,
            &shipping_json,
            &items_json,
            &input.referral_code,
            &input.provider_session_id,
            now,
            now
        ],
    )?;

    if affected == 0 {
        return Ok(None);
    }

    Ok(Some(Order {
        id,
        user_id: input.user_id.clone(),
        status: OrderStatus::Confirmed,
        total_cents: input.total_cents,
        currency: input.currency.clone(),
        shipping_address: input.shipping_address.clone(),
        items: input.items.clone(),
        referral_code: input.referral_code.clone(),
        provider_session_id: input.provider_session_id.clone(),
        created_at: now,
        updated_at: now,
    }))
}

pub fn get_order_by_id(conn: &Connection, id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLS),
        &[&id],
    )
}

pub fn get_order_by_session(conn: &Connection, session_id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM orders WHERE provider_session_id = ?1",
            ORDER_COLS
        ),
        &[&session_id],
    )
}

pub fn list_orders(
    conn: &Connection,
    filters: &OrderFilters,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Order>, i64)> {
    let mut where_clause = String::from("WHERE 1=1");
    if filters.status.is_some() {
        where_clause.push_str(" AND status = ?");
    }
    if filters.user_id.is_some() {
        where_clause.push_str(" AND user_id = ?");
    }

    let filter_params = || -> Vec<Box<dyn rusqlite::ToSql>> {
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(s) = filters.status {
            params.push(Box::new(s.as_str().to_string()));
        }
        if let Some(ref u) = filters.user_id {
            params.push(Box::new(u.clone()));
        }
        params
    };

    let count_params = filter_params();
    let count_refs: Vec<&dyn rusqlite::ToSql> = count_params.iter().map(|b| b.as_ref()).collect();
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM orders {}", where_clause),
        count_refs.as_slice(),
        |row| row.get(0),
    )?;

    let mut select_params = filter_params();
    select_params.push(Box::new(limit));
    select_params.push(Box::new(offset));
    let select_refs: Vec<&dyn rusqlite::ToSql> = select_params.iter().map(|b| b.as_ref()).collect();

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM orders {} ORDER BY created_at DESC LIMIT ? OFFSET ?",
        ORDER_COLS, where_clause
    ))?;
    let orders = stmt
        .query_map(select_refs.as_slice(), super::from_row::FromRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok((orders, total))
}

/// Update an order's fulfillment status, returning the updated order.
/// Commission rows are append-only and deliberately untouched by status
/// changes; a shipped or cancelled order keeps the ledger it earned.
pub fn update_order_status(
    conn: &Connection,
    id: &str,
    status: OrderStatus,
) -> Result<Option<Order>> {
    UpdateBuilder::new("orders", id)
        .with_updated_at()
        .set("status", status.as_str().to_string())
        .execute_returning(conn, ORDER_COLS)
}

// ============ Commissions ============

/// Append a commission row unconditionally. Webhook-driven paths should use
/// [`try_create_commission`] so redeliveries cannot double-pay.
pub fn create_commission(conn: &Connection, input: &CreateCommission) -> Result<Commission> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO commissions (id, order_id, instructor_id, commission_type, base_total_cents,
                                  rate_bps, amount_cents, source_ref, paid_out, payout_request_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, NULL, ?9)",
        params![
            &id,
            &input.order_id,
            &input.instructor_id,
            input.commission_type.as_str(),
            input.base_total_cents,
            input.rate_bps,
            input.amount_cents,
            &input.source_ref,
            now
        ],
    )?;

    Ok(Commission {
        id,
        order_id: input.order_id.clone(),
        instructor_id: input.instructor_id.clone(),
        commission_type: input.commission_type,
        base_total_cents: input.base_total_cents,
        rate_bps: input.rate_bps,
        amount_cents: input.amount_cents,
        source_ref: input.source_ref.clone(),
        paid_out: false,
        payout_request_id: None,
        created_at: now,
    })
}

/// Atomically append a commission row, returning true if this call recorded it.
///
/// Duplicate protection comes from two partial unique indexes: at most one row
/// per (order, instructor, type), and at most one row per
/// (instructor, type, source_ref) for rows that carry a provider reference.
/// A redelivered event that maps to an already-recorded commission is silently
/// ignored and this returns false.
pub fn try_create_commission(conn: &Connection, input: &CreateCommission) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO commissions (id, order_id, instructor_id, commission_type,
                                            base_total_cents, rate_bps, amount_cents, source_ref,
                                            paid_out, payout_request_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, NULL, ?9)",
        params![
            gen_id(),
            &input.order_id,
            &input.instructor_id,
            input.commission_type.as_str(),
            input.base_total_cents,
            input.rate_bps,
            input.amount_cents,
            &input.source_ref,
            now()
        ],
    )?;
    Ok(affected > 0)
}

pub fn list_commissions(
    conn: &Connection,
    instructor_id: &str,
    filters: &CommissionFilters,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Commission>, i64)> {
    let mut where_clause = String::from("WHERE instructor_id = ?");
    if filters.paid_out.is_some() {
        where_clause.push_str(" AND paid_out = ?");
    }

    let filter_params = || -> Vec<Box<dyn rusqlite::ToSql>> {
        let mut params: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(instructor_id.to_string())];
        if let Some(p) = filters.paid_out {
            params.push(Box::new(p as i32));
        }
        params
    };

    let count_params = filter_params();
    let count_refs: Vec<&dyn rusqlite::ToSql> = count_params.iter().map(|b| b.as_ref()).collect();
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM commissions {}", where_clause),
        count_refs.as_slice(),
        |row| row.get(0),
    )?;

    let mut select_params = filter_params();
    select_params.push(Box::new(limit));
    select_params.push(Box::new(offset));
    let select_refs: Vec<&dyn rusqlite::ToSql> = select_params.iter().map(|b| b.as_ref()).collect();

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM commissions {} ORDER BY created_at DESC LIMIT ? OFFSET ?",
        COMMISSION_COLS, where_clause
    ))?;
    let commissions = stmt
        .query_map(select_refs.as_slice(), super::from_row::FromRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok((commissions, total))
}

pub fn list_commissions_for_order(conn: &Connection, order_id: &str) -> Result<Vec<Commission>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM commissions WHERE order_id = ?1 ORDER BY created_at",
            COMMISSION_COLS
        ),
        params![order_id],
    )
}

/// Derive an instructor's earnings breakdown from the ledger.
///
/// Balances are never stored. The available figure is the sum of unpaid
/// commission rows minus the sum of in-flight (processing) payout
/// reservations, floored at zero.
pub fn earnings_summary(conn: &Connection, instructor_id: &str) -> Result<EarningsSummary> {
    let (total, direct, referral, instructor_referral, paid_out): (i64, i64, i64, i64, i64) =
        conn.query_row(
            "SELECT
                COALESCE(SUM(amount_cents), 0),
                COALESCE(SUM(CASE WHEN commission_type = 'direct' THEN amount_cents ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN commission_type = 'referral' THEN amount_cents ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN commission_type = 'instructor_referral' THEN amount_cents ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN paid_out = 1 THEN amount_cents ELSE 0 END), 0)
             FROM commissions WHERE instructor_id = ?1",
            params![instructor_id],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            },
        )?;

    let pending: i64 = conn.query_row(
        "SELECT COALESCE(SUM(amount_cents), 0) FROM payout_requests
         WHERE instructor_id = ?1 AND status = 'processing'",
        params![instructor_id],
        |row| row.get(0),
    )?;

    let unpaid = total - paid_out;
    Ok(EarningsSummary {
        total_earned_cents: total,
        direct_cents: direct,
        referral_cents: referral,
        instructor_referral_cents: instructor_referral,
        paid_out_cents: paid_out,
        pending_payout_cents: pending,
        available_cents: (unpaid - pending).max(0),
    })
}

/// Current payable balance: unpaid commissions minus processing reservations,
/// floored at zero.
pub fn available_balance(conn: &Connection, instructor_id: &str) -> Result<i64> {
    let balance: i64 = conn.query_row(
        "SELECT
            COALESCE((SELECT SUM(amount_cents) FROM commissions
                      WHERE instructor_id = ?1 AND paid_out = 0), 0)
          - COALESCE((SELECT SUM(amount_cents) FROM payout_requests
                      WHERE instructor_id = ?1 AND status = 'processing'), 0)",
        params![instructor_id],
        |row| row.get(0),
    )?;
    Ok(balance.max(0))
}

// ============ Payout requests ============

/// Atomically reserve an instructor's full available balance for payout.
///
/// This function uses a transaction with IMMEDIATE mode to prevent race
/// conditions where two concurrent payout requests could both read the same
/// balance and reserve it twice. Within the transaction it:
/// 1. computes the available balance,
/// 2. inserts a processing payout_request for that amount,
/// 3. stamps every unpaid, unreserved commission row with the request id.
///
/// The stamped rows are exactly the rows a later [`complete_payout_request`]
/// will flip to paid, so the request amount and the marked rows always agree.
///
/// Returns `AppError::InsufficientBalance` if the balance is below the
/// payout minimum.
pub fn reserve_payout(conn: &mut Connection, instructor_id: &str) -> Result<PayoutRequest> {
    // Use IMMEDIATE to acquire write lock at transaction start, preventing TOCTOU races
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

    let amount = available_balance(&tx, instructor_id)?;
    if amount < MIN_PAYOUT_CENTS {
        return Err(AppError::InsufficientBalance(
            msg::INSUFFICIENT_BALANCE.to_string(),
        ));
    }

    let id = gen_id();
    let now = now();
    tx.execute(
        "INSERT INTO payout_requests (id, instructor_id, amount_cents, status,
                                      provider_transfer_id, failure_reason, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, NULL, NULL, ?5, ?6)",
        params![
            &id,
            instructor_id,
            amount,
            PayoutStatus::Processing.as_str(),
            now,
            now
        ],
    )?;
    tx.execute(
        "UPDATE commissions SET payout_request_id = ?1
         WHERE instructor_id = ?2 AND paid_out = 0 AND payout_request_id IS NULL",
        params![&id, instructor_id],
    )?;
    tx.commit()?;

    Ok(PayoutRequest {
        id,
        instructor_id: instructor_id.to_string(),
        amount_cents: amount,
        status: PayoutStatus::Processing,
        provider_transfer_id: None,
        failure_reason: None,
        created_at: now,
        updated_at: now,
    })
}

/// Finalize a payout after the provider transfer succeeded: mark the request
/// completed and flip its reserved commission rows to paid, in one transaction.
///
/// Returns `Ok(None)` if the request is missing or no longer processing,
/// which callers must treat as a reconciliation case since the transfer has
/// already gone out.
pub fn complete_payout_request(
    conn: &mut Connection,
    id: &str,
    transfer_id: &str,
) -> Result<Option<PayoutRequest>> {
    let tx = conn.transaction()?;

    let affected = tx.execute(
        "UPDATE payout_requests SET status = ?1, provider_transfer_id = ?2, updated_at = ?3
         WHERE id = ?4 AND status = ?5",
        params![
            PayoutStatus::Completed.as_str(),
            transfer_id,
            now(),
            id,
            PayoutStatus::Processing.as_str()
        ],
    )?;
    if affected == 0 {
        return Ok(None);
    }

    tx.execute(
        "UPDATE commissions SET paid_out = 1 WHERE payout_request_id = ?1 AND paid_out = 0",
        params![id],
    )?;

    let request = query_one(
        &tx,
        &format!(
            "SELECT {} FROM payout_requests WHERE id = ?1",
            PAYOUT_REQUEST_COLS
        ),
        &[&id],
    )?;
    tx.commit()?;
    Ok(request)
}

/// Mark a payout request failed and release its reservation: stamped
/// commission rows return to the unreserved pool untouched, so the failed
/// attempt leaves the ledger exactly as it was.
pub fn fail_payout_request(
    conn: &mut Connection,
    id: &str,
    reason: &str,
) -> Result<Option<PayoutRequest>> {
    let tx = conn.transaction()?;

    let affected = tx.execute(
        "UPDATE payout_requests SET status = ?1, failure_reason = ?2, updated_at = ?3
         WHERE id = ?4 AND status = ?5",
        params![
            PayoutStatus::Failed.as_str(),
            reason,
            now(),
            id,
            PayoutStatus::Processing.as_str()
        ],
    )?;
    if affected == 0 {
        return Ok(None);
    }

    tx.execute(
        "UPDATE commissions SET payout_request_id = NULL
         WHERE payout_request_id = ?1 AND paid_out = 0",
        params![id],
    )?;

    let request = query_one(
        &tx,
        &format!(
            "SELECT {} FROM payout_requests WHERE id = ?1",
            PAYOUT_REQUEST_COLS
        ),
        &[&id],
    )?;
    tx.commit()?;
    Ok(request)
}

pub fn get_payout_request(conn: &Connection, id: &str) -> Result<Option<PayoutRequest>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payout_requests WHERE id = ?1",
            PAYOUT_REQUEST_COLS
        ),
        &[&id],
    )
}

/// List payout requests, newest first. Pass an instructor id to scope the
/// listing, or None for the admin view across all instructors.
pub fn list_payout_requests(
    conn: &Connection,
    instructor_id: Option<&str>,
    filters: &PayoutFilters,
    limit: i64,
    offset: i64,
) -> Result<(Vec<PayoutRequest>, i64)> {
    let mut where_clause = String::from("WHERE 1=1");
    if instructor_id.is_some() {
        where_clause.push_str(" AND instructor_id = ?");
    }
    if filters.status.is_some() {
        where_clause.push_str(" AND status = ?");
    }

    let filter_params = || -> Vec<Box<dyn rusqlite::ToSql>> {
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(i) = instructor_id {
            params.push(Box::new(i.to_string()));
        }
        if let Some(s) = filters.status {
            params.push(Box::new(s.as_str().to_string()));
        }
        params
    };

    let count_params = filter_params();
    let count_refs: Vec<&dyn rusqlite::ToSql> = count_params.iter().map(|b| b.as_ref()).collect();
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM payout_requests {}", where_clause),
        count_refs.as_slice(),
        |row| row.get(0),
    )?;

    let mut select_params = filter_params();
    select_params.push(Box::new(limit));
    select_params.push(Box::new(offset));
    let select_refs: Vec<&dyn rusqlite::ToSql> = select_params.iter().map(|b| b.as_ref()).collect();

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM payout_requests {} ORDER BY created_at DESC LIMIT ? OFFSET ?",
        PAYOUT_REQUEST_COLS, where_clause
    ))?;
    let requests = stmt
        .query_map(select_refs.as_slice(), super::from_row::FromRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok((requests, total))
}

// ============ Webhook Event Deduplication ============

/// Atomically record a webhook event, returning true if this is a new event.
/// Returns false if the event was already processed (replay attack prevention).
///
/// Uses INSERT OR IGNORE for atomicity - if the (provider, event_id) pair
/// already exists, the insert is silently ignored and we return false.
pub fn try_record_webhook_event(conn: &Connection, provider: &str, event_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO webhook_events (provider, event_id, created_at) VALUES (?1, ?2, ?3)",
        params![provider, event_id, now()],
    )?;
    Ok(affected > 0)
}

/// Purge old webhook events beyond the retention period.
/// These only gate redelivery; the source_ref unique indexes on commissions
/// keep protecting the ledger after the event rows age out.
/// Returns the number of deleted records.
pub fn purge_old_webhook_events(conn: &Connection, retention_days: i64) -> Result<usize> {
    let cutoff = now() - (retention_days * SECONDS_PER_DAY);
    let deleted = conn.execute(
        "DELETE FROM webhook_events WHERE created_at < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}
