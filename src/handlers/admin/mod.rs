mod instructors;
mod orders;
mod payouts;

pub use instructors::*;
pub use orders::*;
pub use payouts::*;

use axum::{
    middleware,
    routing::{get, patch},
    Router,
};

use crate::db::AppState;
use crate::middleware::admin_auth;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/orders", get(list_all_orders))
        .route("/admin/orders/{id}", get(get_order_detail))
        .route("/admin/orders/{id}/status", patch(update_order_status))
        .route("/admin/instructors", get(list_all_instructors))
        .route("/admin/instructors/{id}", get(get_instructor_detail))
        .route("/admin/payouts", get(list_all_payout_requests))
        .layer(middleware::from_fn_with_state(state, admin_auth))
}
