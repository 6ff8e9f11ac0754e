mod from_row;
pub mod queries;
mod schema;

pub use schema::init_db;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::notify::NotificationService;
use crate::payments::StripeClient;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Ledger database pool (users, instructors, orders, commissions, payouts)
    pub db: DbPool,
    /// Base URL for checkout redirect callbacks
    pub base_url: String,
    /// Dev mode accepts unsigned webhooks when no secret is configured
    pub dev_mode: bool,
    /// Payment provider client
    pub stripe: Arc<StripeClient>,
    /// Fire-and-forget notification sink
    pub notifications: Arc<NotificationService>,
    /// Bearer token guarding /admin routes (None disables them)
    pub admin_token: Option<String>,
    /// Ledger currency, used for payout transfers
    pub currency: String,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    Pool::builder().max_size(10).build(manager)
}
