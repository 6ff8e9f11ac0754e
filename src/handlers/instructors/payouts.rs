use axum::{Extension, extract::State};
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::middleware::InstructorContext;
use crate::models::{EarningsSummary, Instructor, PayoutFilters, PayoutRequest};
use crate::pagination::{Paginated, PaginationQuery};

/// Request a payout of the full available balance.
///
/// There is no amount parameter: the reservation transaction reads the
/// balance and creates the `processing` request in one step, so two
/// concurrent requests cannot both claim the same earnings. The transfer to
/// the connected account happens after the reservation commits; a transfer
/// failure resolves the request `failed` and releases the reserved
/// commissions for the next attempt.
pub async fn request_payout(
    State(state): State<AppState>,
    Extension(ctx): Extension<InstructorContext>,
) -> Result<Json<PayoutRequest>> {
    let Some(account_id) = ctx.instructor.payout_account_id.as_deref() else {
        return Err(AppError::NotOnboarded(msg::NOT_ONBOARDED.into()));
    };
    if !ctx.instructor.payouts_enabled {
        return Err(AppError::NotOnboarded(msg::NOT_ONBOARDED.into()));
    }

    let mut conn = state.db.get()?;
    let request = queries::reserve_payout(&mut conn, &ctx.instructor.id)?;

    // The request id doubles as the provider idempotency key, so a retried
    // send of this same reservation cannot create a second transfer.
    let transfer = state
        .stripe
        .create_transfer(account_id, request.amount_cents, &state.currency, &request.id)
        .await;

    match transfer {
        Ok(transfer_id) => match queries::complete_payout_request(&mut conn, &request.id, &transfer_id) {
            Ok(Some(completed)) => Ok(Json(completed)),
            Ok(None) => {
                // The money moved but the request was no longer `processing`.
                // Nothing safe to do automatically; flag for reconciliation.
                tracing::error!(
                    payout_request_id = %request.id,
                    transfer_id = %transfer_id,
                    "Transfer succeeded but payout request was not in processing state; manual reconciliation required"
                );
                let current = queries::get_payout_request(&conn, &request.id)?.unwrap_or(request);
                Ok(Json(current))
            }
            Err(e) => {
                tracing::error!(
                    payout_request_id = %request.id,
                    transfer_id = %transfer_id,
                    "Transfer succeeded but marking the payout paid failed: {}; manual reconciliation required",
                    e
                );
                Ok(Json(request))
            }
        },
        Err(e) => {
            if let Err(mark_err) =
                queries::fail_payout_request(&mut conn, &request.id, &e.to_string())
            {
                tracing::error!(
                    payout_request_id = %request.id,
                    "Failed to mark payout request failed after transfer error: {}",
                    mark_err
                );
            }
            Err(e)
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PayoutStatusResponse {
    pub summary: EarningsSummary,
    pub requests: Paginated<PayoutRequest>,
}

/// Payout overview: derived earnings summary plus request history.
pub async fn get_payout_status(
    State(state): State<AppState>,
    Extension(ctx): Extension<InstructorContext>,
    Query(filters): Query<PayoutFilters>,
    Query(pagination): Query<PaginationQuery>,
) -> Result<Json<PayoutStatusResponse>> {
    let (limit, offset) = pagination.resolve();
    let conn = state.db.get()?;
    let summary = queries::earnings_summary(&conn, &ctx.instructor.id)?;
    let (items, total) =
        queries::list_payout_requests(&conn, Some(&ctx.instructor.id), &filters, limit, offset)?;
    Ok(Json(PayoutStatusResponse {
        summary,
        requests: Paginated {
            items,
            total,
            limit,
            offset,
        },
    }))
}

pub async fn get_my_payout_request(
    State(state): State<AppState>,
    Extension(ctx): Extension<InstructorContext>,
    Path(id): Path<String>,
) -> Result<Json<PayoutRequest>> {
    let conn = state.db.get()?;
    let request = queries::get_payout_request(&conn, &id)?
        .filter(|r| r.instructor_id == ctx.instructor.id)
        .ok_or_else(|| AppError::NotFound(msg::PAYOUT_REQUEST_NOT_FOUND.into()))?;
    Ok(Json(request))
}

#[derive(Debug, Deserialize)]
pub struct UpdatePayoutAccountRequest {
    pub payout_account_id: String,
}

/// Store the connected payout account and sync its onboarded flag.
///
/// Also serves as a re-sync: calling it with the already-stored id refreshes
/// `payouts_enabled` from the provider after the instructor finishes
/// onboarding.
pub async fn update_payout_account(
    State(state): State<AppState>,
    Extension(ctx): Extension<InstructorContext>,
    Json(request): Json<UpdatePayoutAccountRequest>,
) -> Result<Json<Instructor>> {
    let account_id = request.payout_account_id.trim();
    if account_id.is_empty() {
        return Err(AppError::BadRequest(msg::PAYOUT_ACCOUNT_EMPTY.into()));
    }

    let account = state.stripe.retrieve_account(account_id).await?;
    let onboarded = account.payouts_enabled && account.details_submitted;

    let conn = state.db.get()?;
    let updated = queries::set_instructor_payout_account(&conn, &ctx.instructor.id, &account.id, onboarded)?
        .or_not_found(msg::INSTRUCTOR_NOT_FOUND)?;
    Ok(Json(updated))
}
