use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::de::DeserializeOwned;

use crate::db::AppState;
use crate::payments::{
    StripeCheckoutSession, StripeInvoice, StripeSubscription, StripeWebhookEvent,
};

use super::common::{
    ActivationData, CancellationData, CheckoutData, RenewalData, WebhookEvent, WebhookProvider,
    WebhookResult, handle_webhook,
};

/// Stripe webhook provider implementation.
pub struct StripeWebhookProvider;

impl WebhookProvider for StripeWebhookProvider {
    fn provider_name(&self) -> &'static str {
        "stripe"
    }

    fn has_secret(&self, state: &AppState) -> bool {
        state.stripe.has_webhook_secret()
    }

    fn extract_signature(&self, headers: &HeaderMap) -> Result<String, WebhookResult> {
        let value = headers
            .get("stripe-signature")
            .ok_or((StatusCode::BAD_REQUEST, "Missing stripe-signature header"))?;
        match value.to_str() {
            Ok(s) => Ok(s.to_string()),
            Err(e) => {
                tracing::debug!("Non-ASCII bytes in stripe-signature header: {}", e);
                Err((StatusCode::BAD_REQUEST, "Invalid signature header"))
            }
        }
    }

    fn verify_signature(
        &self,
        state: &AppState,
        body: &Bytes,
        signature: &str,
    ) -> Result<bool, WebhookResult> {
        state
            .stripe
            .verify_webhook_signature(body, signature)
            .map_err(|e| {
                tracing::error!("Signature verification error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Signature verification failed",
                )
            })
    }

    fn parse_event(&self, body: &Bytes) -> Result<WebhookEvent, WebhookResult> {
        let event: StripeWebhookEvent = serde_json::from_slice(body).map_err(|e| {
            tracing::error!("Failed to parse Stripe webhook: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid JSON")
        })?;

        match event.event_type.as_str() {
            "checkout.session.completed" => parse_checkout_completed(&event),
            "invoice.paid" => parse_invoice_paid(&event),
            "customer.subscription.deleted" => parse_subscription_deleted(&event),
            other => {
                tracing::debug!("Ignoring Stripe event type: {}", other);
                Ok(WebhookEvent::Ignored)
            }
        }
    }
}

/// Deserialize `data.object` into the shape the event type calls for.
/// Malformed objects are a 400 so the provider surfaces them as failures.
fn decode_object<T: DeserializeOwned>(
    event: &StripeWebhookEvent,
    what: &str,
) -> Result<T, WebhookResult> {
    serde_json::from_value(event.data.object.clone()).map_err(|e| {
        tracing::error!("Failed to parse {}: {}", what, e);
        (StatusCode::BAD_REQUEST, "Invalid event object")
    })
}

/// A completed checkout session is either a storefront purchase
/// (`mode == "payment"`) or an instructor subscription signup
/// (`mode == "subscription"`); everything else is ignored.
fn parse_checkout_completed(event: &StripeWebhookEvent) -> Result<WebhookEvent, WebhookResult> {
    let session: StripeCheckoutSession = decode_object(event, "checkout session")?;

    if session.payment_status != "paid" {
        return Ok(WebhookEvent::Ignored);
    }

    match session.mode.as_deref() {
        Some("payment") => parse_storefront_purchase(session),
        Some("subscription") => parse_instructor_signup(session),
        _ => Ok(WebhookEvent::Ignored),
    }
}

fn parse_storefront_purchase(
    session: StripeCheckoutSession,
) -> Result<WebhookEvent, WebhookResult> {
    // Email entered during checkout lives in customer_details; customer_email
    // is only set when the session was created with one.
    let buyer_email = session
        .customer_details
        .as_ref()
        .and_then(|d| d.email.clone())
        .or(session.customer_email)
        .ok_or((StatusCode::OK, "No buyer email in session"))?;
    let buyer_name = session.customer_details.as_ref().and_then(|d| d.name.clone());

    let total_cents = session
        .amount_total
        .ok_or((StatusCode::OK, "No amount in session"))?;
    let currency = session
        .currency
        .ok_or((StatusCode::OK, "No currency in session"))?
        .to_lowercase();

    // items and shipping_address ride through metadata as JSON strings
    // written by the storefront at session creation.
    let items = session
        .metadata
        .items
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok());
    let shipping_address = session
        .metadata
        .shipping_address
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok());

    Ok(WebhookEvent::OrderCompleted(CheckoutData {
        session_id: session.id,
        buyer_email,
        buyer_name,
        total_cents,
        currency,
        referral_code: session.metadata.referral_code,
        items,
        shipping_address,
        locale: session.metadata.locale,
    }))
}

fn parse_instructor_signup(session: StripeCheckoutSession) -> Result<WebhookEvent, WebhookResult> {
    let instructor_id = session
        .metadata
        .instructor_id
        .ok_or((StatusCode::OK, "No instructor ID in session"))?;
    let subscription_id = session
        .subscription
        .ok_or((StatusCode::OK, "No subscription in session"))?;

    Ok(WebhookEvent::InstructorSubscribed(ActivationData {
        session_id: session.id,
        instructor_id,
        subscription_id,
        customer_id: session.customer,
    }))
}

fn parse_invoice_paid(event: &StripeWebhookEvent) -> Result<WebhookEvent, WebhookResult> {
    let invoice: StripeInvoice = decode_object(event, "invoice")?;

    let subscription_id = match invoice.subscription {
        Some(id) => id,
        None => return Ok(WebhookEvent::Ignored),
    };

    // subscription_create is the signup invoice, settled by the checkout
    // completion; only billing cycles after it carry the renewal bonus.
    let is_first_invoice = match invoice.billing_reason.as_deref() {
        Some("subscription_create") => true,
        Some("subscription_cycle") | Some("subscription_update") => false,
        _ => return Ok(WebhookEvent::Ignored),
    };

    Ok(WebhookEvent::SubscriptionRenewed(RenewalData {
        invoice_id: invoice.id,
        subscription_id,
        is_first_invoice,
        is_paid: invoice.status == "paid",
    }))
}

fn parse_subscription_deleted(event: &StripeWebhookEvent) -> Result<WebhookEvent, WebhookResult> {
    let subscription: StripeSubscription = decode_object(event, "subscription")?;
    Ok(WebhookEvent::SubscriptionCancelled(CancellationData {
        subscription_id: subscription.id,
    }))
}

/// Axum handler for Stripe webhooks.
pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    handle_webhook(&StripeWebhookProvider, &state, headers, body).await
}
