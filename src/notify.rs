//! Notification sink for transactional events.
//!
//! Notifications are typed payloads POSTed to an operator-configured webhook
//! URL (a downstream mailer or bot renders them). Delivery is fire-and-forget
//! with bounded retries; nothing in the payment or payout paths ever waits on
//! a notification, and a dead sink never fails a webhook or an order.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use reqwest::Client;
use serde::Serialize;

use crate::config::Config;

/// Retry delays in seconds (exponential backoff: 1s, 4s, 16s)
const RETRY_DELAYS: &[u64] = &[1, 4, 16];

/// Typed notification payloads. Serialized with a `type` tag so the sink can
/// route on one field; amounts are integer cents like everywhere else.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationKind {
    /// To the buyer after their order is recorded.
    OrderConfirmation {
        order_id: String,
        total_cents: i64,
        currency: String,
    },
    /// To the instructor whose code attributed a sale.
    SaleNotification {
        order_id: String,
        amount_cents: i64,
    },
    /// To the parent instructor when a referred instructor activates.
    ReferralSuccess { amount_cents: i64 },
    /// To an instructor whose subscription renewed for another cycle.
    SubscriptionRenewal {},
    /// To a freshly registered instructor, with their code and the checkout
    /// link for the subscription.
    InstructorWelcome {
        referral_code: String,
        checkout_url: String,
    },
    /// To the buyer when an admin moves their order to a new status.
    OrderStatusChanged { order_id: String, status: String },
}

impl NotificationKind {
    pub fn event_name(&self) -> &'static str {
        match self {
            NotificationKind::OrderConfirmation { .. } => "order_confirmation",
            NotificationKind::SaleNotification { .. } => "sale_notification",
            NotificationKind::ReferralSuccess { .. } => "referral_success",
            NotificationKind::SubscriptionRenewal {} => "subscription_renewal",
            NotificationKind::InstructorWelcome { .. } => "instructor_welcome",
            NotificationKind::OrderStatusChanged { .. } => "order_status_changed",
        }
    }
}

/// A notification addressed to one recipient in one locale. The sink decides
/// how to render it; we only carry the keys it needs.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub recipient: String,
    pub locale: String,
    #[serde(flatten)]
    pub kind: NotificationKind,
}

/// Notification delivery service.
///
/// With no sink URL configured the service is disabled: payloads are logged
/// at debug and dropped, which keeps dev setups and tests quiet.
#[derive(Clone)]
pub struct NotificationService {
    webhook_url: Option<String>,
    default_locale: String,
    http_client: Client,
}

impl NotificationService {
    pub fn new(config: &Config) -> Self {
        Self {
            webhook_url: config.notify_webhook_url.clone(),
            default_locale: config.default_locale.clone(),
            http_client: Client::new(),
        }
    }

    /// Spawn fire-and-forget delivery of a notification.
    ///
    /// The send happens in a background task with bounded retries; failures
    /// are logged and never surface to the caller. Panics in the spawned task
    /// are logged rather than silently swallowed.
    pub fn spawn(&self, recipient: &str, locale: Option<&str>, kind: NotificationKind) {
        let Some(url) = self.webhook_url.clone() else {
            tracing::debug!(
                event = kind.event_name(),
                recipient = %recipient,
                "Notification sink disabled, dropping payload"
            );
            return;
        };

        let notification = Notification {
            recipient: recipient.to_string(),
            locale: locale
                .map(str::to_string)
                .unwrap_or_else(|| self.default_locale.clone()),
            kind,
        };
        let event_name = notification.kind.event_name();
        let client = self.http_client.clone();

        tokio::spawn(
            AssertUnwindSafe(async move {
                send_notification(&client, &url, &notification).await;
            })
            .catch_unwind()
            .map(move |result| {
                if let Err(panic) = result {
                    let panic_msg = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(
                        "Notification task panicked for event '{}': {}",
                        event_name,
                        panic_msg
                    );
                }
            }),
        );
    }
}

async fn send_notification(client: &Client, url: &str, notification: &Notification) {
    let event_name = notification.kind.event_name();

    for (attempt, delay_secs) in std::iter::once(&0u64).chain(RETRY_DELAYS.iter()).enumerate() {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_secs(*delay_secs)).await;
        }

        match client
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Kickback-Event", event_name)
            .json(notification)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                if attempt > 0 {
                    tracing::debug!(
                        event = event_name,
                        attempt,
                        "Notification delivered after retry"
                    );
                }
                return;
            }
            Ok(resp) => {
                let status = resp.status();
                let transient = status.as_u16() == 429 || status.is_server_error();
                if !transient {
                    // The sink rejected the payload; retrying won't change that.
                    tracing::error!(
                        event = event_name,
                        status = %status,
                        "Notification sink rejected payload, not retrying"
                    );
                    return;
                }
                tracing::warn!(
                    event = event_name,
                    status = %status,
                    "Notification sink returned transient error"
                );
            }
            Err(e) => {
                tracing::warn!(event = event_name, error = %e, "Notification send failed");
            }
        }
    }

    tracing::error!(
        event = event_name,
        attempts = RETRY_DELAYS.len() + 1,
        "Notification not delivered after all retries"
    );
}
