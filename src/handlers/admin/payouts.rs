use axum::extract::State;

use crate::db::{AppState, queries};
use crate::error::Result;
use crate::extractors::{Json, Query};
use crate::models::{PayoutFilters, PayoutRequest};
use crate::pagination::{Paginated, PaginationQuery};

/// All payout requests across instructors, for support and reconciliation.
pub async fn list_all_payout_requests(
    State(state): State<AppState>,
    Query(filters): Query<PayoutFilters>,
    Query(pagination): Query<PaginationQuery>,
) -> Result<Json<Paginated<PayoutRequest>>> {
    let (limit, offset) = pagination.resolve();
    let conn = state.db.get()?;
    let (items, total) = queries::list_payout_requests(&conn, None, &filters, limit, offset)?;
    Ok(Json(Paginated {
        items,
        total,
        limit,
        offset,
    }))
}
