mod earnings;
mod payouts;

pub use earnings::*;
pub use payouts::*;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use crate::db::AppState;
use crate::middleware::instructor_auth;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/instructor/earnings", get(get_earnings))
        .route("/instructor/commissions", get(list_my_commissions))
        .route("/instructor/payouts", post(request_payout))
        .route("/instructor/payouts", get(get_payout_status))
        .route("/instructor/payouts/{id}", get(get_my_payout_request))
        .route("/instructor/payout-account", put(update_payout_account))
        .layer(middleware::from_fn_with_state(state, instructor_auth))
}
