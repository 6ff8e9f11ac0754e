use serde::{Deserialize, Serialize};
use std::fmt;

/// Fulfillment status of an order.
///
/// Webhook-created orders start at `confirmed` (payment already settled);
/// later transitions are admin actions and never touch commissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "confirmed" => Some(OrderStatus::Confirmed),
            "processing" => Some(OrderStatus::Processing),
            "shipped" => Some(OrderStatus::Shipped),
            "delivered" => Some(OrderStatus::Delivered),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A one-time storefront purchase.
///
/// Total and items are immutable once created; only the fulfillment status
/// changes afterwards. `provider_session_id` is the idempotency key for
/// webhook-created orders (unique where present).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub status: OrderStatus,
    pub total_cents: i64,
    pub currency: String,
    /// Shipping address as captured at checkout (opaque JSON).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_address: Option<serde_json::Value>,
    /// Line items as captured at checkout (opaque JSON).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<serde_json::Value>,
    /// Referral code given at purchase time, normalized (kept even when it
    /// resolved to nothing, for traceability).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referral_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_session_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub user_id: String,
    pub total_cents: i64,
    pub currency: String,
    pub shipping_address: Option<serde_json::Value>,
    pub items: Option<serde_json::Value>,
    pub referral_code: Option<String>,
    pub provider_session_id: Option<String>,
}

/// Admin list filters for orders.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct OrderFilters {
    pub status: Option<OrderStatus>,
    pub user_id: Option<String>,
}
