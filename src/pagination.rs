//! Shared pagination for the admin and instructor list endpoints.

use serde::{Deserialize, Serialize};

/// Page size applied when the client sends no `limit`.
pub const DEFAULT_LIMIT: i64 = 50;
/// Hard cap on `limit`; larger requests are clamped, not rejected.
pub const MAX_LIMIT: i64 = 100;

/// `?limit=&offset=` query parameters. Both optional; out-of-range values
/// are clamped by [`PaginationQuery::resolve`] rather than erroring, so a
/// sloppy client still gets a page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaginationQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PaginationQuery {
    /// The effective `(limit, offset)` window for the query.
    pub fn resolve(&self) -> (i64, i64) {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}

/// One page of a listing plus the unfiltered-total and the window that
/// produced it, so clients can page without a separate count call.
#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}
