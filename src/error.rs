use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// User-facing error strings, shared between handlers and tests.
pub mod msg {
    pub const EMAIL_EMPTY: &str = "Email must not be empty";
    pub const INVALID_EMAIL_FORMAT: &str = "Invalid email format";
    pub const NAME_EMPTY: &str = "Name must not be empty";

    pub const INSTRUCTOR_NOT_FOUND: &str = "Instructor not found";
    pub const ORDER_NOT_FOUND: &str = "Order not found";
    pub const PAYOUT_REQUEST_NOT_FOUND: &str = "Payout request not found";

    pub const INVALID_REFERRAL_CODE: &str =
        "Referral code must be 3-20 alphanumeric, dash, or underscore characters";
    pub const REFERRAL_CODE_TAKEN: &str = "Referral code is already taken";
    pub const INSTRUCTOR_EXISTS: &str = "An instructor account already exists for this email";

    pub const NOT_ONBOARDED: &str = "Payout account is missing or not onboarded";
    pub const INSUFFICIENT_BALANCE: &str =
        "Available balance is below the minimum payout threshold";
    pub const TRANSFER_FAILED: &str = "Payout transfer failed";
    pub const PAYOUT_ACCOUNT_EMPTY: &str = "Payout account id must not be empty";

    pub const INVALID_ORDER_STATUS: &str = "Invalid order status";

    pub const INVALID_SIGNATURE_FORMAT: &str = "Invalid signature format";
    pub const INVALID_TIMESTAMP_IN_SIGNATURE: &str = "Invalid timestamp in signature";
    pub const WEBHOOK_SECRET_NOT_CONFIGURED: &str = "Webhook secret not configured";
}

/// Application error. Every handler failure flows through here so the wire
/// response is always the same `{"error", "details"}` envelope.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Payout requested without a connected, onboarded payout account.
    #[error("Not onboarded: {0}")]
    NotOnboarded(String),

    /// Payout requested below the minimum threshold or against a zero balance.
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    /// Payment-provider API failure (transfer creation, account retrieval).
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Wire shape of every error this API returns. `details` is omitted for
/// categories where the cause must not leak (auth failures, internals).
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "Not found", Some(m.clone())),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, "Bad request", Some(m.clone())),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized", None),
            AppError::Conflict(m) => (StatusCode::CONFLICT, "Conflict", Some(m.clone())),
            AppError::NotOnboarded(m) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Not onboarded",
                Some(m.clone()),
            ),
            AppError::InsufficientBalance(m) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Insufficient balance",
                Some(m.clone()),
            ),
            AppError::Provider(m) => {
                tracing::error!("Provider error: {}", m);
                (
                    StatusCode::BAD_GATEWAY,
                    "Payment provider error",
                    Some(m.clone()),
                )
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid JSON", Some(e.to_string()))
            }
            // Storage and internal failures return an opaque 500; the cause
            // goes to the log, never to the client.
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Internal(m) => {
                tracing::error!("Internal error: {}", m);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Turns empty lookups into `NotFound` with a caller-supplied message.
pub trait OptionExt<T> {
    fn or_not_found(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| AppError::NotFound(msg.to_string()))
    }
}
