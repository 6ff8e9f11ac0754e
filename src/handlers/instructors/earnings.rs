use axum::{Extension, extract::State};

use crate::db::{AppState, queries};
use crate::error::Result;
use crate::extractors::{Json, Query};
use crate::middleware::InstructorContext;
use crate::models::{Commission, CommissionFilters, EarningsSummary};
use crate::pagination::{Paginated, PaginationQuery};

/// Derived earnings aggregate for the authenticated instructor.
pub async fn get_earnings(
    State(state): State<AppState>,
    Extension(ctx): Extension<InstructorContext>,
) -> Result<Json<EarningsSummary>> {
    let conn = state.db.get()?;
    let summary = queries::earnings_summary(&conn, &ctx.instructor.id)?;
    Ok(Json(summary))
}

/// The instructor's commission ledger, newest first.
pub async fn list_my_commissions(
    State(state): State<AppState>,
    Extension(ctx): Extension<InstructorContext>,
    Query(filters): Query<CommissionFilters>,
    Query(pagination): Query<PaginationQuery>,
) -> Result<Json<Paginated<Commission>>> {
    let (limit, offset) = pagination.resolve();
    let conn = state.db.get()?;
    let (items, total) =
        queries::list_commissions(&conn, &ctx.instructor.id, &filters, limit, offset)?;
    Ok(Json(Paginated {
        items,
        total,
        limit,
        offset,
    }))
}
