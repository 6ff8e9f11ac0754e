use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result, msg};
use crate::extractors::Json;
use crate::models::{CreateInstructor, validate_email_format};
use crate::notify::NotificationKind;
use crate::referral::{generate_referral_code, normalize_referral_code};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub name: String,
    /// Preferred notification locale (falls back to the configured default)
    #[serde(default)]
    pub locale: Option<String>,
    /// Vanity referral code; generated from the name when absent
    #[serde(default)]
    pub requested_code: Option<String>,
    /// Referral code of the instructor who recruited this one
    #[serde(default)]
    pub referred_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub instructor_id: String,
    pub referral_code: String,
    /// Instructor session token. Returned exactly once; store it client-side.
    pub api_token: String,
    /// Hosted checkout for the annual instructor subscription
    pub checkout_url: String,
    /// Whether `referred_by` resolved to a real instructor
    pub parent_attributed: bool,
}

/// Register a new instructor and start their subscription checkout.
///
/// The instructor starts `inactive`; the subscription-created webhook flips
/// them to `active` once the first payment settles. An unknown `referred_by`
/// code is ignored rather than rejected, so a mistyped recruiter code never
/// blocks a signup.
pub async fn register_instructor(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>> {
    validate_email_format(&request.email)?;
    if request.name.trim().is_empty() {
        return Err(AppError::BadRequest(msg::NAME_EMPTY.into()));
    }

    let conn = state.db.get()?;

    let user = queries::get_or_create_user(
        &conn,
        &request.email,
        Some(request.name.trim()),
        request.locale.as_deref(),
    )?;

    if queries::get_instructor_by_user_id(&conn, &user.id)?.is_some() {
        return Err(AppError::Conflict(msg::INSTRUCTOR_EXISTS.into()));
    }

    let referral_code = match request.requested_code.as_deref() {
        Some(requested) => {
            let code = normalize_referral_code(requested)
                .ok_or_else(|| AppError::BadRequest(msg::INVALID_REFERRAL_CODE.into()))?;
            if queries::get_instructor_by_referral_code(&conn, &code)?.is_some() {
                return Err(AppError::Conflict(msg::REFERRAL_CODE_TAKEN.into()));
            }
            code
        }
        None => generate_referral_code(&conn, Some(request.name.trim()))?,
    };

    // Unknown or malformed recruiter codes are soft-ignored: the signup
    // proceeds without a parent and the response says so.
    let parent = match request.referred_by.as_deref().and_then(normalize_referral_code) {
        Some(code) => queries::get_instructor_by_referral_code(&conn, &code)?,
        None => None,
    };
    let parent_attributed = parent.is_some();

    let customer_id = state
        .stripe
        .create_customer(&user.email, Some(request.name.trim()))
        .await?;

    let instructor = queries::create_instructor(
        &conn,
        &CreateInstructor {
            user_id: user.id.clone(),
            referral_code,
            parent_instructor_id: parent.map(|p| p.id),
            provider_customer_id: Some(customer_id.clone()),
        },
    )?;

    let success_url = format!("{}/instructors/checkout/success", state.base_url);
    let cancel_url = format!("{}/instructors/checkout/cancelled", state.base_url);
    let session = state
        .stripe
        .create_subscription_checkout_session(&customer_id, &instructor.id, &success_url, &cancel_url)
        .await?;

    state.notifications.spawn(
        &user.email,
        user.locale.as_deref(),
        NotificationKind::InstructorWelcome {
            referral_code: instructor.referral_code.clone(),
            checkout_url: session.url.clone(),
        },
    );

    Ok(Json(RegisterResponse {
        instructor_id: instructor.id,
        referral_code: instructor.referral_code,
        api_token: instructor.api_token,
        checkout_url: session.url,
        parent_attributed,
    }))
}
