use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result, msg};

/// Basic email format validation.
///
/// Validates that email has:
/// - Exactly one @ symbol
/// - Non-empty local part (before @)
/// - Non-empty domain part (after @) with at least one dot
///
/// Intentionally permissive; this is a sanity check, not RFC 5322.
pub fn validate_email_format(email: &str) -> Result<()> {
    let email = email.trim();

    if email.is_empty() {
        return Err(AppError::BadRequest(msg::EMAIL_EMPTY.into()));
    }

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return Err(AppError::BadRequest(msg::INVALID_EMAIL_FORMAT.into()));
    }

    let local_part = parts[0];
    let domain_part = parts[1];

    if local_part.is_empty() || local_part.contains(' ') {
        return Err(AppError::BadRequest(msg::INVALID_EMAIL_FORMAT.into()));
    }

    if domain_part.is_empty() || !domain_part.contains('.') {
        return Err(AppError::BadRequest(msg::INVALID_EMAIL_FORMAT.into()));
    }

    if domain_part.starts_with('.') || domain_part.ends_with('.') {
        return Err(AppError::BadRequest(msg::INVALID_EMAIL_FORMAT.into()));
    }

    Ok(())
}

/// A storefront customer. Buyers are created lazily from checkout webhooks;
/// instructors get a row at registration. Email is the identity key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Preferred notification locale (falls back to the configured default).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct CreateUser {
    pub email: String,
    pub name: Option<String>,
    pub locale: Option<String>,
}

impl CreateUser {
    pub fn validate(&self) -> Result<()> {
        validate_email_format(&self.email)
    }
}
