use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::models::{EarningsSummary, Instructor, InstructorStatus};
use crate::pagination::{Paginated, PaginationQuery};

#[derive(Debug, Default, Deserialize)]
pub struct InstructorListQuery {
    #[serde(default)]
    pub status: Option<InstructorStatus>,
}

pub async fn list_all_instructors(
    State(state): State<AppState>,
    Query(query): Query<InstructorListQuery>,
    Query(pagination): Query<PaginationQuery>,
) -> Result<Json<Paginated<Instructor>>> {
    let (limit, offset) = pagination.resolve();
    let conn = state.db.get()?;
    let (items, total) = queries::list_instructors(&conn, query.status, limit, offset)?;
    Ok(Json(Paginated {
        items,
        total,
        limit,
        offset,
    }))
}

#[derive(Debug, Serialize)]
pub struct InstructorDetail {
    pub instructor: Instructor,
    pub earnings: EarningsSummary,
}

/// One instructor with their derived earnings aggregate.
pub async fn get_instructor_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InstructorDetail>> {
    let conn = state.db.get()?;
    let instructor =
        queries::get_instructor_by_id(&conn, &id)?.or_not_found(msg::INSTRUCTOR_NOT_FOUND)?;
    let earnings = queries::earnings_summary(&conn, &instructor.id)?;
    Ok(Json(InstructorDetail {
        instructor,
        earnings,
    }))
}
