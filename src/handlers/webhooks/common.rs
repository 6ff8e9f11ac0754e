//! Common webhook handling infrastructure for payment providers.
//!
//! A provider implementation parses its wire format into provider-agnostic
//! events; the processing functions here own the ledger semantics: idempotent
//! order creation, commission fan-out, subscription lifecycle transitions.
//! Everything is written so an at-least-once, out-of-order event stream
//! converges on the same ledger.

use axum::{
    body::Bytes,
    http::{HeaderMap, StatusCode},
};
use rusqlite::Connection;

use crate::db::{AppState, queries};
use crate::error::AppError;
use crate::models::{
    CreateCommission, CreateOrder, CommissionType, Instructor, InstructorStatus, Order, User,
};
use crate::notify::NotificationKind;
use crate::rates::{DIRECT_RATE_BPS, REFERRAL_RATE_BPS, commission_for, rate_bps};
use crate::referral::{self, ResolvedReferral, normalize_referral_code};

/// Result type for webhook operations.
pub type WebhookResult = (StatusCode, &'static str);

/// Helper to unwrap DB query results with consistent error handling.
fn db_lookup<T>(
    result: Result<Option<T>, AppError>,
    not_found_msg: &'static str,
) -> Result<T, WebhookResult> {
    match result {
        Ok(Some(v)) => Ok(v),
        Ok(None) => Err((StatusCode::OK, not_found_msg)),
        Err(e) => {
            tracing::error!("DB error: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Database error"))
        }
    }
}

/// Helper for subscription lookup with warning log on not found.
fn lookup_instructor_by_subscription<P: WebhookProvider>(
    provider: &P,
    conn: &Connection,
    subscription_id: &str,
) -> Result<Instructor, WebhookResult> {
    match queries::get_instructor_by_subscription(conn, subscription_id) {
        Ok(Some(i)) => Ok(i),
        Ok(None) => {
            tracing::warn!(
                "No instructor found for {} subscription: {}",
                provider.provider_name(),
                subscription_id
            );
            Err((StatusCode::OK, "No instructor for subscription"))
        }
        Err(e) => {
            tracing::error!("DB error: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Database error"))
        }
    }
}

/// Data extracted from a storefront checkout completion event.
#[derive(Debug)]
pub struct CheckoutData {
    /// Provider checkout session id; the idempotency key for the order.
    pub session_id: String,
    pub buyer_email: String,
    pub buyer_name: Option<String>,
    pub total_cents: i64,
    /// Currency code (lowercase, e.g., "usd")
    pub currency: String,
    /// Referral code as entered by the buyer, not yet normalized.
    pub referral_code: Option<String>,
    /// Serialized line items captured at session creation.
    pub items: Option<serde_json::Value>,
    pub shipping_address: Option<serde_json::Value>,
    pub locale: Option<String>,
}

/// Data extracted from a completed instructor subscription checkout.
#[derive(Debug)]
pub struct ActivationData {
    /// Checkout session id; replay key for the activation.
    pub session_id: String,
    pub instructor_id: String,
    pub subscription_id: String,
    pub customer_id: Option<String>,
}

/// Data extracted from a subscription invoice payment.
#[derive(Debug)]
pub struct RenewalData {
    /// Invoice id; replay key for the renewal bonus.
    pub invoice_id: String,
    pub subscription_id: String,
    /// The subscription's first invoice is settled by activation, not here.
    pub is_first_invoice: bool,
    pub is_paid: bool,
}

/// Data extracted from a subscription cancellation event.
#[derive(Debug)]
pub struct CancellationData {
    pub subscription_id: String,
}

/// Parsed webhook event with provider-agnostic data.
#[derive(Debug)]
pub enum WebhookEvent {
    /// Storefront purchase completed - creates order + commissions
    OrderCompleted(CheckoutData),
    /// Instructor subscription checkout completed - activates instructor
    InstructorSubscribed(ActivationData),
    /// Subscription invoice paid - renewal bonus for the parent
    SubscriptionRenewed(RenewalData),
    /// Subscription deleted - instructor canceled
    SubscriptionCancelled(CancellationData),
    /// Event type not relevant to the ledger
    Ignored,
}

/// Trait for payment provider webhook handling.
///
/// Implementors provide provider-specific parsing and signature verification,
/// while the common processing logic handles orders, commissions and
/// lifecycle transitions.
pub trait WebhookProvider: Send + Sync {
    /// Provider name for logging and database storage (e.g., "stripe")
    fn provider_name(&self) -> &'static str;

    /// Whether a webhook secret is configured for this provider.
    fn has_secret(&self, state: &AppState) -> bool;

    /// Extract signature from request headers.
    fn extract_signature(&self, headers: &HeaderMap) -> Result<String, WebhookResult>;

    /// Verify webhook signature against the configured secret.
    fn verify_signature(
        &self,
        state: &AppState,
        body: &Bytes,
        signature: &str,
    ) -> Result<bool, WebhookResult>;

    /// Parse the webhook payload into a provider-agnostic event.
    fn parse_event(&self, body: &Bytes) -> Result<WebhookEvent, WebhookResult>;
}

/// Outcome of processing an order-completion event.
pub enum OrderResult {
    Created(Box<OrderOutcome>),
    /// The session was already claimed by an earlier delivery.
    AlreadyProcessed,
}

/// Everything the post-commit notification fan-out needs.
pub struct OrderOutcome {
    pub order: Order,
    pub buyer: User,
    pub attribution: Option<OrderAttribution>,
}

pub struct OrderAttribution {
    pub instructor: Instructor,
    pub direct_cents: i64,
    pub parent: Option<(Instructor, i64)>,
}

/// Process a completed checkout ATOMICALLY - buyer upsert, order claim, and
/// commission fan-out in a single database transaction.
///
/// The order insert doubles as the idempotency claim: the unique index on the
/// provider session id means exactly one delivery creates the order, and the
/// commissions ride in the same transaction. A failed or unknown referral
/// code never blocks the order; the purchase simply earns no commissions.
pub fn process_order(
    conn: &mut Connection,
    resolved: Option<&ResolvedReferral>,
    data: &CheckoutData,
) -> Result<OrderResult, WebhookResult> {
    let tx = conn.transaction().map_err(|e| {
        tracing::error!("Failed to start transaction: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
    })?;

    let buyer = queries::get_or_create_user(
        &tx,
        &data.buyer_email,
        data.buyer_name.as_deref(),
        data.locale.as_deref(),
    )
    .map_err(|e| {
        tracing::error!("Failed to upsert buyer: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
    })?;

    // Store the canonical form of the code when it has one, the raw string
    // otherwise, so unknown codes stay visible on the order.
    let stored_code = data.referral_code.as_deref().map(|raw| {
        normalize_referral_code(raw).unwrap_or_else(|| raw.trim().to_string())
    });

    let order = match queries::try_create_order(
        &tx,
        &CreateOrder {
            user_id: buyer.id.clone(),
            total_cents: data.total_cents,
            currency: data.currency.clone(),
            shipping_address: data.shipping_address.clone(),
            items: data.items.clone(),
            referral_code: stored_code,
            provider_session_id: Some(data.session_id.clone()),
        },
    ) {
        Ok(Some(order)) => order,
        Ok(None) => return Ok(OrderResult::AlreadyProcessed),
        Err(e) => {
            tracing::error!("Failed to create order: {}", e);
            return Err((StatusCode::INTERNAL_SERVER_ERROR, "Failed to create order"));
        }
    };

    let attribution = match resolved {
        Some(resolved) => {
            record_sale_commissions(&tx, resolved, Some(&order.id), data).map_err(|e| {
                tracing::error!("Failed to record commissions: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to record commissions",
                )
            })?;

            // A prior delivery may have taken the orderless fallback path;
            // link any such rows to the order we just created.
            if let Err(e) = tx.execute(
                "UPDATE commissions SET order_id = ?1 WHERE source_ref = ?2 AND order_id IS NULL",
                rusqlite::params![&order.id, &data.session_id],
            ) {
                tracing::error!("Failed to link fallback commissions: {}", e);
                return Err((StatusCode::INTERNAL_SERVER_ERROR, "Database error"));
            }

            Some(OrderAttribution {
                instructor: resolved.instructor.clone(),
                direct_cents: commission_for(CommissionType::Direct, data.total_cents),
                parent: resolved.parent.as_ref().map(|p| {
                    (
                        p.clone(),
                        commission_for(CommissionType::Referral, data.total_cents),
                    )
                }),
            })
        }
        None => None,
    };

    if let Err(e) = tx.commit() {
        tracing::error!("Failed to commit order transaction: {}", e);
        return Err((StatusCode::INTERNAL_SERVER_ERROR, "Database error"));
    }

    Ok(OrderResult::Created(Box::new(OrderOutcome {
        order,
        buyer,
        attribution,
    })))
}

/// Write the direct and (single-hop) referral commissions for a sale.
///
/// Uses the idempotent insert: the session id rides along as source_ref, so
/// replays and the orderless fallback cannot double-credit anyone.
fn record_sale_commissions(
    conn: &Connection,
    resolved: &ResolvedReferral,
    order_id: Option<&str>,
    data: &CheckoutData,
) -> crate::error::Result<()> {
    queries::try_create_commission(
        conn,
        &CreateCommission {
            order_id: order_id.map(String::from),
            instructor_id: resolved.instructor.id.clone(),
            commission_type: CommissionType::Direct,
            base_total_cents: data.total_cents,
            rate_bps: DIRECT_RATE_BPS,
            amount_cents: commission_for(CommissionType::Direct, data.total_cents),
            source_ref: Some(data.session_id.clone()),
        },
    )?;

    // One hop only: the parent's own parent earns nothing from this sale.
    if let Some(parent) = &resolved.parent {
        queries::try_create_commission(
            conn,
            &CreateCommission {
                order_id: order_id.map(String::from),
                instructor_id: parent.id.clone(),
                commission_type: CommissionType::Referral,
                base_total_cents: data.total_cents,
                rate_bps: REFERRAL_RATE_BPS,
                amount_cents: commission_for(CommissionType::Referral, data.total_cents),
                source_ref: Some(data.session_id.clone()),
            },
        )?;
    }
    Ok(())
}

/// Last-resort path when order creation failed: record the commissions with
/// no order reference so the instructors are still credited, then let the
/// provider retry the event. A later successful delivery re-links these rows
/// to the order it creates.
fn record_orderless_commissions(
    conn: &Connection,
    resolved: &ResolvedReferral,
    data: &CheckoutData,
) {
    if let Err(e) = record_sale_commissions(conn, resolved, None, data) {
        tracing::error!(
            "Failed to record orderless commissions for session {}: {}",
            data.session_id,
            e
        );
    } else {
        tracing::warn!(
            "Recorded orderless commissions for session {} after order creation failure",
            data.session_id
        );
    }
}

/// Outcome of an activation event.
#[derive(Debug)]
pub enum ActivationResult {
    Activated {
        instructor: Instructor,
        /// Parent credited with the flat bonus, if the instructor has one.
        parent: Option<Instructor>,
        bonus_cents: i64,
    },
    AlreadyProcessed,
}

/// Process a completed instructor subscription checkout ATOMICALLY - replay
/// gate, status transition, and the parent's flat bonus in one transaction.
///
/// Gated on the checkout session id. Even after the gate row is purged, the
/// source_ref unique index (keyed on the subscription id) keeps the bonus
/// single-shot.
pub fn process_activation(
    conn: &mut Connection,
    provider: &str,
    data: &ActivationData,
) -> Result<ActivationResult, WebhookResult> {
    let tx = conn.transaction().map_err(|e| {
        tracing::error!("Failed to start transaction: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
    })?;

    match queries::try_record_webhook_event(&tx, provider, &data.session_id) {
        Ok(true) => {}
        Ok(false) => return Ok(ActivationResult::AlreadyProcessed),
        Err(e) => {
            tracing::error!("Failed to record webhook event: {}", e);
            return Err((StatusCode::INTERNAL_SERVER_ERROR, "Database error"));
        }
    }

    let mut instructor = db_lookup(
        queries::get_instructor_by_id(&tx, &data.instructor_id),
        "Instructor not found",
    )?;

    if let Err(e) = queries::activate_instructor(
        &tx,
        &instructor.id,
        &data.subscription_id,
        data.customer_id.as_deref(),
    ) {
        tracing::error!("Failed to activate instructor: {}", e);
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to activate instructor",
        ));
    }

    let bonus_cents = commission_for(CommissionType::InstructorReferral, 0);
    let mut credited_parent = None;
    if let Some(parent_id) = &instructor.parent_instructor_id {
        match queries::get_instructor_by_id(&tx, parent_id) {
            Ok(Some(parent)) => {
                if let Err(e) = queries::try_create_commission(
                    &tx,
                    &CreateCommission {
                        order_id: None,
                        instructor_id: parent.id.clone(),
                        commission_type: CommissionType::InstructorReferral,
                        base_total_cents: 0,
                        rate_bps: rate_bps(CommissionType::InstructorReferral),
                        amount_cents: bonus_cents,
                        source_ref: Some(data.subscription_id.clone()),
                    },
                ) {
                    tracing::error!("Failed to record activation bonus: {}", e);
                    return Err((StatusCode::INTERNAL_SERVER_ERROR, "Database error"));
                }
                credited_parent = Some(parent);
            }
            Ok(None) => {
                tracing::warn!(
                    "Parent instructor {} missing for activation of {}",
                    parent_id,
                    instructor.id
                );
            }
            Err(e) => {
                tracing::error!("DB error: {}", e);
                return Err((StatusCode::INTERNAL_SERVER_ERROR, "Database error"));
            }
        }
    }

    if let Err(e) = tx.commit() {
        tracing::error!("Failed to commit activation: {}", e);
        return Err((StatusCode::INTERNAL_SERVER_ERROR, "Database error"));
    }

    instructor.status = InstructorStatus::Active;
    instructor.provider_subscription_id = Some(data.subscription_id.clone());
    if data.customer_id.is_some() {
        instructor.provider_customer_id = data.customer_id.clone();
    }

    Ok(ActivationResult::Activated {
        instructor,
        parent: credited_parent,
        bonus_cents,
    })
}

/// Outcome of a renewal event.
pub enum RenewalResult {
    Renewed {
        instructor: Instructor,
        /// Parent credited with the recurring bonus, if any.
        parent: Option<Instructor>,
        bonus_cents: i64,
    },
    AlreadyProcessed,
}

/// Process a paid renewal invoice ATOMICALLY - replay gate, status
/// re-affirmation, and the parent's recurring bonus in one transaction.
///
/// Gated on the invoice id, which is also the bonus row's source_ref, so the
/// signup bonus and each cycle's bonus all have distinct keys and each cycle
/// pays exactly once.
pub fn process_renewal(
    conn: &mut Connection,
    provider: &str,
    instructor: &Instructor,
    data: &RenewalData,
) -> Result<RenewalResult, WebhookResult> {
    let tx = conn.transaction().map_err(|e| {
        tracing::error!("Failed to start transaction: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
    })?;

    match queries::try_record_webhook_event(&tx, provider, &data.invoice_id) {
        Ok(true) => {}
        Ok(false) => return Ok(RenewalResult::AlreadyProcessed),
        Err(e) => {
            tracing::error!("Failed to record webhook event: {}", e);
            return Err((StatusCode::INTERNAL_SERVER_ERROR, "Database error"));
        }
    }

    // Re-affirm active: a renewal payment always means the subscription lives.
    if let Err(e) = queries::set_instructor_status(&tx, &instructor.id, InstructorStatus::Active) {
        tracing::error!("Failed to re-affirm instructor status: {}", e);
        return Err((StatusCode::INTERNAL_SERVER_ERROR, "Database error"));
    }

    let bonus_cents = commission_for(CommissionType::InstructorReferral, 0);
    let mut credited_parent = None;
    if let Some(parent_id) = &instructor.parent_instructor_id {
        match queries::get_instructor_by_id(&tx, parent_id) {
            Ok(Some(parent)) => {
                if let Err(e) = queries::try_create_commission(
                    &tx,
                    &CreateCommission {
                        order_id: None,
                        instructor_id: parent.id.clone(),
                        commission_type: CommissionType::InstructorReferral,
                        base_total_cents: 0,
                        rate_bps: rate_bps(CommissionType::InstructorReferral),
                        amount_cents: bonus_cents,
                        source_ref: Some(data.invoice_id.clone()),
                    },
                ) {
                    tracing::error!("Failed to record renewal bonus: {}", e);
                    return Err((StatusCode::INTERNAL_SERVER_ERROR, "Database error"));
                }
                credited_parent = Some(parent);
            }
            Ok(None) => {
                tracing::warn!(
                    "Parent instructor {} missing for renewal of {}",
                    parent_id,
                    instructor.id
                );
            }
            Err(e) => {
                tracing::error!("DB error: {}", e);
                return Err((StatusCode::INTERNAL_SERVER_ERROR, "Database error"));
            }
        }
    }

    if let Err(e) = tx.commit() {
        tracing::error!("Failed to commit renewal: {}", e);
        return Err((StatusCode::INTERNAL_SERVER_ERROR, "Database error"));
    }

    let mut instructor = instructor.clone();
    instructor.status = InstructorStatus::Active;

    Ok(RenewalResult::Renewed {
        instructor,
        parent: credited_parent,
        bonus_cents,
    })
}

/// Process a subscription cancellation - terminal status flip, nothing else.
/// Earned commissions survive cancellation untouched.
pub fn process_cancellation(
    conn: &Connection,
    provider: &str,
    instructor: &Instructor,
    data: &CancellationData,
) -> WebhookResult {
    if let Err(e) = queries::set_instructor_status(conn, &instructor.id, InstructorStatus::Canceled)
    {
        tracing::error!("Failed to cancel instructor: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
    }

    tracing::info!(
        "{} subscription cancelled: subscription={}, instructor_id={}",
        provider,
        data.subscription_id,
        instructor.id
    );

    (StatusCode::OK, "OK")
}

/// Generic webhook handler that delegates to provider-specific implementations.
pub async fn handle_webhook<P: WebhookProvider>(
    provider: &P,
    state: &AppState,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResult {
    if provider.has_secret(state) {
        let signature = match provider.extract_signature(&headers) {
            Ok(s) => s,
            Err(e) => return e,
        };
        match provider.verify_signature(state, &body, &signature) {
            Ok(true) => {}
            Ok(false) => return (StatusCode::UNAUTHORIZED, "Invalid signature"),
            Err(e) => return e,
        }
    } else if state.dev_mode {
        tracing::warn!(
            "{} webhook secret not configured, accepting unverified event (dev mode)",
            provider.provider_name()
        );
    } else {
        tracing::error!(
            "{} webhook secret not configured, refusing event",
            provider.provider_name()
        );
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Webhook secret not configured",
        );
    }

    // Parse the event
    let event = match provider.parse_event(&body) {
        Ok(e) => e,
        Err(e) => return e,
    };

    // Handle based on event type
    match event {
        WebhookEvent::OrderCompleted(data) => handle_order(provider, state, data)
            .await
            .unwrap_or_else(|e| e),
        WebhookEvent::InstructorSubscribed(data) => handle_activation(provider, state, data)
            .await
            .unwrap_or_else(|e| e),
        WebhookEvent::SubscriptionRenewed(data) => handle_renewal(provider, state, data)
            .await
            .unwrap_or_else(|e| e),
        WebhookEvent::SubscriptionCancelled(data) => handle_cancellation(provider, state, data)
            .await
            .unwrap_or_else(|e| e),
        WebhookEvent::Ignored => (StatusCode::OK, "Event ignored"),
    }
}

async fn handle_order<P: WebhookProvider>(
    provider: &P,
    state: &AppState,
    data: CheckoutData,
) -> Result<WebhookResult, WebhookResult> {
    let mut conn = state.db.get().map_err(|e| {
        tracing::error!("DB connection error: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
    })?;

    // Resolve attribution up front; a bad code degrades to "no commissions",
    // never to a failed order.
    let resolved = match &data.referral_code {
        Some(code) => match referral::resolve(&conn, code) {
            Ok(Some(r)) => Some(r),
            Ok(None) => {
                tracing::info!(
                    "Unknown or invalid referral code on session {}: {:?}",
                    data.session_id,
                    code
                );
                None
            }
            Err(e) => {
                tracing::error!("Referral resolution failed: {}", e);
                return Err((StatusCode::INTERNAL_SERVER_ERROR, "Database error"));
            }
        },
        None => None,
    };

    let outcome = match process_order(&mut conn, resolved.as_ref(), &data) {
        Ok(OrderResult::Created(outcome)) => outcome,
        Ok(OrderResult::AlreadyProcessed) => return Ok((StatusCode::OK, "Already processed")),
        Err(err) => {
            // The order could not be written. Credit the instructors anyway
            // (idempotently, keyed on the session id) and let the provider
            // retry the event to heal the order itself.
            if let Some(resolved) = &resolved {
                record_orderless_commissions(&conn, resolved, &data);
            }
            return Err(err);
        }
    };

    tracing::info!(
        "{} checkout completed: session={}, order_id={}, attributed={}",
        provider.provider_name(),
        data.session_id,
        outcome.order.id,
        outcome.attribution.is_some()
    );

    spawn_order_notifications(state, &conn, &outcome);

    Ok((StatusCode::OK, "OK"))
}

/// Post-commit notification fan-out for a new order. Best-effort: a missing
/// instructor user row skips that notification with a warning.
fn spawn_order_notifications(state: &AppState, conn: &Connection, outcome: &OrderOutcome) {
    state.notifications.spawn(
        &outcome.buyer.email,
        outcome.buyer.locale.as_deref(),
        NotificationKind::OrderConfirmation {
            order_id: outcome.order.id.clone(),
            total_cents: outcome.order.total_cents,
            currency: outcome.order.currency.clone(),
        },
    );

    if let Some(attribution) = &outcome.attribution {
        match queries::get_user_by_id(conn, &attribution.instructor.user_id) {
            Ok(Some(user)) => state.notifications.spawn(
                &user.email,
                user.locale.as_deref(),
                NotificationKind::SaleNotification {
                    order_id: outcome.order.id.clone(),
                    amount_cents: attribution.direct_cents,
                },
            ),
            Ok(None) => tracing::warn!(
                "No user for instructor {}, skipping sale notification",
                attribution.instructor.id
            ),
            Err(e) => tracing::warn!("Failed to load instructor user: {}", e),
        }
    }
}

async fn handle_activation<P: WebhookProvider>(
    provider: &P,
    state: &AppState,
    data: ActivationData,
) -> Result<WebhookResult, WebhookResult> {
    let mut conn = state.db.get().map_err(|e| {
        tracing::error!("DB connection error: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
    })?;

    let result = process_activation(&mut conn, provider.provider_name(), &data)?;

    match result {
        ActivationResult::Activated {
            instructor,
            parent,
            bonus_cents,
        } => {
            tracing::info!(
                "{} instructor activated: instructor_id={}, subscription={}, parent_credited={}",
                provider.provider_name(),
                instructor.id,
                data.subscription_id,
                parent.is_some()
            );

            if let Some(parent) = parent {
                match queries::get_user_by_id(&conn, &parent.user_id) {
                    Ok(Some(user)) => state.notifications.spawn(
                        &user.email,
                        user.locale.as_deref(),
                        NotificationKind::ReferralSuccess {
                            amount_cents: bonus_cents,
                        },
                    ),
                    Ok(None) => tracing::warn!(
                        "No user for parent instructor {}, skipping referral notification",
                        parent.id
                    ),
                    Err(e) => tracing::warn!("Failed to load parent user: {}", e),
                }
            }

            Ok((StatusCode::OK, "OK"))
        }
        ActivationResult::AlreadyProcessed => Ok((StatusCode::OK, "Already processed")),
    }
}

async fn handle_renewal<P: WebhookProvider>(
    provider: &P,
    state: &AppState,
    data: RenewalData,
) -> Result<WebhookResult, WebhookResult> {
    // The first invoice belongs to activation; paying the signup bonus here
    // too would double-credit the parent.
    if data.is_first_invoice {
        return Ok((StatusCode::OK, "Initial invoice - handled by activation"));
    }

    if !data.is_paid {
        return Ok((StatusCode::OK, "Invoice not paid"));
    }

    let mut conn = state.db.get().map_err(|e| {
        tracing::error!("DB connection error: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
    })?;

    let instructor = lookup_instructor_by_subscription(provider, &conn, &data.subscription_id)?;

    let result = process_renewal(&mut conn, provider.provider_name(), &instructor, &data)?;

    match result {
        RenewalResult::Renewed {
            instructor, parent, ..
        } => {
            tracing::info!(
                "{} subscription renewed: subscription={}, instructor_id={}, parent_credited={}",
                provider.provider_name(),
                data.subscription_id,
                instructor.id,
                parent.is_some()
            );

            match queries::get_user_by_id(&conn, &instructor.user_id) {
                Ok(Some(user)) => state.notifications.spawn(
                    &user.email,
                    user.locale.as_deref(),
                    NotificationKind::SubscriptionRenewal {},
                ),
                Ok(None) => tracing::warn!(
                    "No user for instructor {}, skipping renewal notification",
                    instructor.id
                ),
                Err(e) => tracing::warn!("Failed to load instructor user: {}", e),
            }

            Ok((StatusCode::OK, "OK"))
        }
        RenewalResult::AlreadyProcessed => Ok((StatusCode::OK, "Already processed")),
    }
}

async fn handle_cancellation<P: WebhookProvider>(
    provider: &P,
    state: &AppState,
    data: CancellationData,
) -> Result<WebhookResult, WebhookResult> {
    let conn = state.db.get().map_err(|e| {
        tracing::error!("DB connection error: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
    })?;

    let instructor = lookup_instructor_by_subscription(provider, &conn, &data.subscription_id)?;

    Ok(process_cancellation(
        &conn,
        provider.provider_name(),
        &instructor,
        &data,
    ))
}
