use rusqlite::Connection;

/// Initialize the ledger database schema.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Users (identity - buyers and instructors, keyed by email)
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT,
            locale TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_users_email ON users(email);

        -- Instructors (affiliate accounts)
        -- referral_code is stored normalized-upper; parent_instructor_id is
        -- set at registration and never updated.
        CREATE TABLE IF NOT EXISTS instructors (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE REFERENCES users(id),
            referral_code TEXT NOT NULL UNIQUE,
            parent_instructor_id TEXT REFERENCES instructors(id),
            status TEXT NOT NULL DEFAULT 'inactive'
                CHECK (status IN ('inactive', 'active', 'canceled')),
            provider_customer_id TEXT,
            provider_subscription_id TEXT,
            payout_account_id TEXT,
            payouts_enabled INTEGER NOT NULL DEFAULT 0,
            api_token TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_instructors_code ON instructors(referral_code);
        CREATE INDEX IF NOT EXISTS idx_instructors_parent ON instructors(parent_instructor_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_instructors_subscription
            ON instructors(provider_subscription_id)
            WHERE provider_subscription_id IS NOT NULL;

        -- Orders (one-time purchases)
        -- provider_session_id is the webhook idempotency key: INSERT OR
        -- IGNORE against this index is the claim that makes redelivered
        -- checkout events no-ops.
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id),
            status TEXT NOT NULL DEFAULT 'confirmed'
                CHECK (status IN ('pending', 'confirmed', 'processing', 'shipped', 'delivered', 'cancelled')),
            total_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            shipping_address TEXT,
            items TEXT,
            referral_code TEXT,
            provider_session_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_orders_session
            ON orders(provider_session_id)
            WHERE provider_session_id IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_orders_user ON orders(user_id);
        CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);

        -- Commissions (append-only ledger)
        -- Two replay guards:
        --   (order_id, instructor_id, commission_type) caps fan-out at one
        --   direct + one referral entry per order;
        --   (instructor_id, commission_type, source_ref) dedups bonuses and
        --   the orderless fallback path by provider-side cause id.
        CREATE TABLE IF NOT EXISTS commissions (
            id TEXT PRIMARY KEY,
            order_id TEXT REFERENCES orders(id),
            instructor_id TEXT NOT NULL REFERENCES instructors(id),
            commission_type TEXT NOT NULL
                CHECK (commission_type IN ('direct', 'referral', 'instructor_referral')),
            base_total_cents INTEGER NOT NULL,
            rate_bps INTEGER NOT NULL,
            amount_cents INTEGER NOT NULL,
            source_ref TEXT,
            paid_out INTEGER NOT NULL DEFAULT 0,
            payout_request_id TEXT REFERENCES payout_requests(id),
            created_at INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_commissions_order_type
            ON commissions(order_id, instructor_id, commission_type)
            WHERE order_id IS NOT NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_commissions_source
            ON commissions(instructor_id, commission_type, source_ref)
            WHERE source_ref IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_commissions_instructor
            ON commissions(instructor_id, paid_out);
        CREATE INDEX IF NOT EXISTS idx_commissions_payout
            ON commissions(payout_request_id)
            WHERE payout_request_id IS NOT NULL;

        -- Payout requests (reservation rows; see queries::reserve_payout)
        CREATE TABLE IF NOT EXISTS payout_requests (
            id TEXT PRIMARY KEY,
            instructor_id TEXT NOT NULL REFERENCES instructors(id),
            amount_cents INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'processing'
                CHECK (status IN ('processing', 'completed', 'failed')),
            provider_transfer_id TEXT,
            failure_reason TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_payout_requests_instructor
            ON payout_requests(instructor_id, status);

        -- Webhook events (replay prevention for subscription lifecycle
        -- events; rows are purgeable after the provider's redelivery window)
        CREATE TABLE IF NOT EXISTS webhook_events (
            provider TEXT NOT NULL,
            event_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (provider, event_id)
        );
        CREATE INDEX IF NOT EXISTS idx_webhook_events_created
            ON webhook_events(created_at);
        "#,
    )
}
