use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::sync::Arc;
use std::time::Duration;

use kickback::config::Config;
use kickback::db::{AppState, create_pool, init_db, queries};
use kickback::handlers;
use kickback::models::{CommissionType, CreateCommission, CreateInstructor, CreateOrder};
use kickback::notify::NotificationService;
use kickback::payments::StripeClient;
use kickback::rates;

#[derive(Parser, Debug)]
#[command(name = "kickback")]
#[command(about = "Referral attribution and commission ledger for the storefront")]
struct Cli {
    /// Seed the database with dev data (two instructors, a referred sale)
    #[arg(long)]
    seed: bool,

    /// Delete the database on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

/// Seeds a fresh dev database with a small referral tree: a parent
/// instructor, a child instructor the parent recruited, and one referred
/// sale with its commission fan-out. Skipped when seed data already exists.
fn seed_dev_data(state: &AppState, currency: &str) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    // Check if already seeded
    if queries::get_instructor_by_referral_code(&conn, "DEMO-PARENT")
        .expect("Failed to check for seed data")
        .is_some()
    {
        tracing::info!("Database already has seed data, skipping seed");
        return;
    }

    tracing::info!("Seeding demo ledger data");

    // 1. Parent instructor (recruits others)
    let parent_user = queries::get_or_create_user(
        &conn,
        "parent@kickback.local",
        Some("Demo Parent"),
        None,
    )
    .expect("Failed to create parent user");
    let parent = queries::create_instructor(
        &conn,
        &CreateInstructor {
            user_id: parent_user.id.clone(),
            referral_code: "DEMO-PARENT".to_string(),
            parent_instructor_id: None,
            provider_customer_id: None,
        },
    )
    .expect("Failed to create parent instructor");
    queries::activate_instructor(&conn, &parent.id, "sub_seed_parent", None)
        .expect("Failed to activate parent instructor");

    tracing::info!("Parent instructor: {} ({})", parent_user.email, parent.referral_code);

    // 2. Child instructor, recruited by the parent
    let child_user = queries::get_or_create_user(
        &conn,
        "child@kickback.local",
        Some("Demo Child"),
        None,
    )
    .expect("Failed to create child user");
    let child = queries::create_instructor(
        &conn,
        &CreateInstructor {
            user_id: child_user.id.clone(),
            referral_code: "DEMO-CHILD".to_string(),
            parent_instructor_id: Some(parent.id.clone()),
            provider_customer_id: None,
        },
    )
    .expect("Failed to create child instructor");
    queries::activate_instructor(&conn, &child.id, "sub_seed_child", None)
        .expect("Failed to activate child instructor");

    // Activation bonus the parent would have earned from the webhook
    queries::create_commission(
        &conn,
        &CreateCommission {
            order_id: None,
            instructor_id: parent.id.clone(),
            commission_type: CommissionType::InstructorReferral,
            base_total_cents: 0,
            rate_bps: 0,
            amount_cents: rates::INSTRUCTOR_REFERRAL_BONUS_CENTS,
            source_ref: Some("sub_seed_child".to_string()),
        },
    )
    .expect("Failed to create activation bonus");

    tracing::info!("Child instructor: {} ({})", child_user.email, child.referral_code);

    // 3. A referred sale: buyer used the child's code
    let buyer = queries::get_or_create_user(&conn, "buyer@kickback.local", Some("Demo Buyer"), None)
        .expect("Failed to create buyer");
    let total_cents = 12_900;
    let order = queries::create_order(
        &conn,
        &CreateOrder {
            user_id: buyer.id.clone(),
            total_cents,
            currency: currency.to_string(),
            shipping_address: None,
            items: Some(serde_json::json!([
                {"sku": "protein-vanilla-2lb", "quantity": 2},
                {"sku": "creatine-300g", "quantity": 1}
            ])),
            referral_code: Some(child.referral_code.clone()),
            provider_session_id: Some("cs_seed_demo".to_string()),
        },
    )
    .expect("Failed to create demo order");

    queries::create_commission(
        &conn,
        &CreateCommission {
            order_id: Some(order.id.clone()),
            instructor_id: child.id.clone(),
            commission_type: CommissionType::Direct,
            base_total_cents: total_cents,
            rate_bps: rates::DIRECT_RATE_BPS,
            amount_cents: rates::commission_for(CommissionType::Direct, total_cents),
            source_ref: Some("cs_seed_demo".to_string()),
        },
    )
    .expect("Failed to create direct commission");
    queries::create_commission(
        &conn,
        &CreateCommission {
            order_id: Some(order.id.clone()),
            instructor_id: parent.id.clone(),
            commission_type: CommissionType::Referral,
            base_total_cents: total_cents,
            rate_bps: rates::REFERRAL_RATE_BPS,
            amount_cents: rates::commission_for(CommissionType::Referral, total_cents),
            source_ref: Some("cs_seed_demo".to_string()),
        },
    )
    .expect("Failed to create referral commission");

    tracing::info!("Order: {} ({} {})", order.id, total_cents, currency);

    tracing::info!("Demo ledger seeded");

    // Plain println so the tokens are copy-paste friendly (no log prefix)
    println!();
    println!("--- dev seed ---");
    println!("  parent_api_token: {}", parent.api_token);
    println!("  child_api_token: {}", child.api_token);
    println!("  parent_code: {}", parent.referral_code);
    println!("  child_code: {}", child.referral_code);
    println!("  order_id: {}", order.id);
    println!("--- end ---");
    println!();
}

/// Spawns a background task that periodically purges processed webhook events
/// past the redelivery horizon. Runs hourly.
fn spawn_purge_task(state: AppState, retention_days: i64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(60 * 60);

        loop {
            tokio::time::sleep(interval).await;

            match state.db.get() {
                Ok(conn) => match queries::purge_old_webhook_events(&conn, retention_days) {
                    Ok(count) => {
                        if count > 0 {
                            tracing::debug!("Purged {} old webhook events", count);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to purge webhook events: {}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to get db connection for purge: {}", e);
                }
            }
        }
    });

    tracing::info!("Background webhook-event purge task started (runs hourly)");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kickback=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Starting in development mode");
    }
    if config.admin_token.is_none() {
        tracing::warn!("KICKBACK_ADMIN_TOKEN not set; /admin endpoints are disabled");
    }

    // Create database connection pool and initialize schema
    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let state = AppState {
        db: db_pool,
        base_url: config.base_url.clone(),
        dev_mode: config.dev_mode,
        stripe: Arc::new(StripeClient::new(&config)),
        notifications: Arc::new(NotificationService::new(&config)),
        admin_token: config.admin_token.clone(),
        currency: config.currency.clone(),
    };

    // Purge old webhook events on startup (0 = never purge)
    if config.webhook_retention_days > 0 {
        let conn = state.db.get().expect("Failed to get connection for purge");
        match queries::purge_old_webhook_events(&conn, config.webhook_retention_days) {
            Ok(count) if count > 0 => {
                tracing::info!(
                    "Purged {} webhook events older than {} days",
                    count,
                    config.webhook_retention_days
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Failed to purge old webhook events: {}", e);
            }
        }
        spawn_purge_task(state.clone(), config.webhook_retention_days);
    }

    // Seed dev data if --seed flag is passed (only in dev mode)
    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (unset KICKBACK_ENV=production)");
        } else {
            seed_dev_data(&state, &config.currency);
        }
    }

    // Build the application router
    let app = Router::new()
        // Public endpoints (no auth)
        .merge(handlers::public::router())
        // Webhook endpoints (signature-verified)
        .merge(handlers::webhooks::router())
        // Instructor API (bearer api_token auth)
        .merge(handlers::instructors::router(state.clone()))
        // Admin API (bearer admin token auth)
        .merge(handlers::admin::router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start the server
    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();

    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("Kickback server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");

    // Cleanup on exit if ephemeral mode
    if cleanup_on_exit {
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        } else {
            tracing::info!("Removed ephemeral database {}", db_path);
        }
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Received shutdown signal, stopping");
}
