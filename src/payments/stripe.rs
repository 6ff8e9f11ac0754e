use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, de::DeserializeOwned};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::Config;
use crate::error::{AppError, Result, msg};

type HmacSha256 = Hmac<Sha256>;

const API_BASE: &str = "https://api.stripe.com/v1";

// Note: The instructor subscription uses a pre-configured Stripe price
// (price_xxx) instead of ad-hoc price_data. This keeps the annual plan
// organized in the Stripe dashboard.

#[derive(Debug, Deserialize)]
struct CreateCustomerResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CreateCheckoutSessionResponse {
    id: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct CreateTransferResponse {
    id: String,
}

/// Hosted checkout session handle returned to the caller.
#[derive(Debug, Clone)]
pub struct CheckoutSessionInfo {
    pub id: String,
    pub url: String,
}

/// Connected payout account state, as reported by the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct PayoutAccount {
    pub id: String,
    #[serde(default)]
    pub payouts_enabled: bool,
    #[serde(default)]
    pub details_submitted: bool,
}

/// Thin client over the few Stripe endpoints this service calls.
/// Form-encoded requests, JSON responses, nothing cached.
#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    webhook_secret: Option<String>,
    instructor_price_id: String,
}

impl StripeClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            secret_key: config.stripe_secret_key.clone(),
            webhook_secret: config.stripe_webhook_secret.clone(),
            instructor_price_id: config.stripe_instructor_price_id.clone(),
        }
    }

    pub fn has_webhook_secret(&self) -> bool {
        self.webhook_secret.is_some()
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        idempotency_key: Option<&str>,
        form: &[(&str, &str)],
    ) -> Result<T> {
        let mut request = self
            .client
            .post(format!("{}{}", API_BASE, path))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(form);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("Stripe request failed: {}", e)))?;
        Self::decode(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(format!("{}{}", API_BASE, path))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("Stripe request failed: {}", e)))?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Provider(format!(
                "Stripe returned {}: {}",
                status, body
            )));
        }
        response
            .json()
            .await
            .map_err(|e| AppError::Provider(format!("Unexpected Stripe response shape: {}", e)))
    }

    /// Create a Stripe customer for a registering instructor.
    pub async fn create_customer(&self, email: &str, name: Option<&str>) -> Result<String> {
        let mut form = vec![("email", email)];
        if let Some(name) = name {
            form.push(("name", name));
        }
        let customer: CreateCustomerResponse = self.post_form("/customers", None, &form).await?;
        Ok(customer.id)
    }

    /// Create a hosted checkout session for the annual instructor
    /// subscription.
    ///
    /// The instructor id rides along as metadata on both the session and the
    /// subscription, so lifecycle events can be attributed back without any
    /// provider-side lookup.
    pub async fn create_subscription_checkout_session(
        &self,
        customer_id: &str,
        instructor_id: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSessionInfo> {
        let session: CreateCheckoutSessionResponse = self
            .post_form(
                "/checkout/sessions",
                None,
                &[
                    ("mode", "subscription"),
                    ("customer", customer_id),
                    ("success_url", success_url),
                    ("cancel_url", cancel_url),
                    ("line_items[0][price]", &self.instructor_price_id),
                    ("line_items[0][quantity]", "1"),
                    ("metadata[instructor_id]", instructor_id),
                    ("subscription_data[metadata][instructor_id]", instructor_id),
                ],
            )
            .await?;
        Ok(CheckoutSessionInfo {
            id: session.id,
            url: session.url,
        })
    }

    /// Transfer an instructor's balance to their connected account.
    ///
    /// The caller supplies the payout request id as the idempotency key, so a
    /// retried call after a network failure cannot move the money twice.
    pub async fn create_transfer(
        &self,
        account_id: &str,
        amount_cents: i64,
        currency: &str,
        idempotency_key: &str,
    ) -> Result<String> {
        let amount = amount_cents.to_string();
        let transfer: CreateTransferResponse = self
            .post_form(
                "/transfers",
                Some(idempotency_key),
                &[
                    ("amount", amount.as_str()),
                    ("currency", currency),
                    ("destination", account_id),
                ],
            )
            .await?;
        Ok(transfer.id)
    }

    /// Fetch a connected account's onboarding state.
    pub async fn retrieve_account(&self, account_id: &str) -> Result<PayoutAccount> {
        self.get_json(&format!("/accounts/{}", account_id)).await
    }

    /// Maximum age of a webhook timestamp before it's rejected (in seconds).
    /// Stripe recommends 300 seconds (5 minutes).
    const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;
    /// Allowed clock skew for timestamps from the future (in seconds).
    const WEBHOOK_FUTURE_SKEW_SECS: i64 = 60;

    /// Check a `stripe-signature` header against the configured secret.
    ///
    /// Returns `Ok(false)` for a well-formed header that does not match
    /// (wrong secret, altered payload, stale timestamp); `Err` for a header
    /// that is not even well-formed, and for a missing secret.
    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<bool> {
        let webhook_secret = self
            .webhook_secret
            .as_deref()
            .ok_or_else(|| AppError::Internal(msg::WEBHOOK_SECRET_NOT_CONFIGURED.into()))?;

        // Header format: t=<unix seconds>,v1=<hex hmac>
        let mut timestamp = None;
        let mut sig_v1 = None;
        for part in signature.split(',') {
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.strip_prefix("v1=") {
                sig_v1 = Some(s);
            }
        }
        let timestamp_str =
            timestamp.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;
        let sig_v1 =
            sig_v1.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;

        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| AppError::BadRequest(msg::INVALID_TIMESTAMP_IN_SIGNATURE.into()))?;

        // A replayed capture carries its original timestamp; bounding the
        // age bounds the replay window.
        let age = chrono::Utc::now().timestamp() - timestamp;
        if age > Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
            tracing::warn!(
                "Stripe webhook rejected: timestamp too old (age={}s, max={}s)",
                age,
                Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS
            );
            return Ok(false);
        }
        if age < -Self::WEBHOOK_FUTURE_SKEW_SECS {
            tracing::warn!(
                "Stripe webhook rejected: timestamp in the future (age={}s)",
                age
            );
            return Ok(false);
        }

        // The signature covers the raw body prefixed with the header's own
        // timestamp, tying it to this delivery.
        let signed_payload = format!("{}.{}", timestamp_str, String::from_utf8_lossy(payload));
        let mut mac = HmacSha256::new_from_slice(webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal("Webhook secret is not a usable HMAC key".into()))?;
        mac.update(signed_payload.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        // Constant-time compare. The length check before it leaks nothing:
        // a v1 signature is always 64 hex chars.
        let expected_bytes = expected.as_bytes();
        let provided_bytes = sig_v1.as_bytes();
        if expected_bytes.len() != provided_bytes.len() {
            return Ok(false);
        }
        Ok(expected_bytes.ct_eq(provided_bytes).into())
    }
}

/// Stripe webhook envelope; `data.object` stays raw JSON until the event
/// type picks a shape for it.
#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

// ============ checkout.session.completed ============

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub mode: Option<String>, // "payment" or "subscription"
    pub payment_status: String,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    pub customer: Option<String>,
    pub customer_email: Option<String>,
    pub customer_details: Option<StripeCustomerDetails>,
    pub subscription: Option<String>, // Present for subscription mode
    #[serde(default)]
    pub metadata: StripeMetadata,
}

#[derive(Debug, Deserialize)]
pub struct StripeCustomerDetails {
    pub email: Option<String>,
    pub name: Option<String>,
}

/// Metadata written by the storefront at session creation. All values are
/// strings on the wire; `items` and `shipping_address` carry JSON documents.
#[derive(Debug, Default, Deserialize)]
pub struct StripeMetadata {
    pub referral_code: Option<String>,
    pub items: Option<String>,
    pub shipping_address: Option<String>,
    pub locale: Option<String>,
    pub instructor_id: Option<String>,
}

// ============ invoice.paid ============

#[derive(Debug, Deserialize)]
pub struct StripeInvoice {
    pub id: String,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    pub billing_reason: Option<String>, // "subscription_create", "subscription_cycle", etc.
    pub status: String,                 // "paid", "open", etc.
}

// ============ customer.subscription.deleted ============

#[derive(Debug, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub customer: Option<String>,
    pub status: String, // "active", "canceled", etc.
}
