use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    /// Anything but KICKBACK_ENV=production counts as dev.
    pub dev_mode: bool,
    /// Bearer token guarding the /admin routes. Unset disables them.
    pub admin_token: Option<String>,
    pub stripe_secret_key: String,
    /// Webhook signing secret. Unset is tolerated in dev only, where events
    /// are parsed without verification.
    pub stripe_webhook_secret: Option<String>,
    /// Price id of the annual instructor-program subscription.
    pub stripe_instructor_price_id: String,
    /// Notification sink URL. Unset disables the sink.
    pub notify_webhook_url: Option<String>,
    pub default_locale: String,
    /// Ledger currency for commissions and payouts.
    pub currency: String,
    /// Days to keep webhook_events rows (provider redelivery horizon).
    pub webhook_retention_days: i64,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            host: env::var("KICKBACK_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("KICKBACK_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            database_path: env::var("KICKBACK_DB").unwrap_or_else(|_| "kickback.db".to_string()),
            base_url: env::var("KICKBACK_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            dev_mode: env::var("KICKBACK_ENV")
                .map(|e| e != "production")
                .unwrap_or(true),
            admin_token: env::var("KICKBACK_ADMIN_TOKEN").ok(),
            stripe_secret_key: env::var("STRIPE_SECRET_KEY").unwrap_or_default(),
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").ok(),
            stripe_instructor_price_id: env::var("STRIPE_INSTRUCTOR_PRICE_ID")
                .unwrap_or_default(),
            notify_webhook_url: env::var("KICKBACK_NOTIFY_WEBHOOK_URL").ok(),
            default_locale: env::var("KICKBACK_DEFAULT_LOCALE")
                .unwrap_or_else(|_| "en".to_string()),
            currency: env::var("KICKBACK_CURRENCY").unwrap_or_else(|_| "usd".to_string()),
            webhook_retention_days: env::var("KICKBACK_WEBHOOK_RETENTION_DAYS")
                .ok()
                .and_then(|d| d.parse().ok())
                .unwrap_or(7),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
