use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

use crate::db::{AppState, queries};
use crate::models::Instructor;
use crate::util::extract_bearer_token;

/// Authenticated instructor, available to handlers via request extensions.
#[derive(Clone)]
pub struct InstructorContext {
    pub instructor: Instructor,
}

/// Authenticate an instructor from their bearer API token.
///
/// Any status may authenticate: an inactive or canceled instructor can still
/// read their ledger and request payouts for what they already earned.
pub async fn instructor_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = extract_bearer_token(request.headers()).ok_or(StatusCode::UNAUTHORIZED)?;

    let conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let instructor = queries::get_instructor_by_api_token(&conn, token)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    request
        .extensions_mut()
        .insert(InstructorContext { instructor });

    Ok(next.run(request).await)
}
