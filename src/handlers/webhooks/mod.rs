pub mod common;
pub mod stripe;

pub use stripe::handle_stripe_webhook;

use axum::{Router, routing::post};

use crate::db::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/stripe", post(handle_stripe_webhook))
}
