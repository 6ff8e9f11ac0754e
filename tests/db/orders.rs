//! Order persistence and session-claim idempotency tests
//!
//! The unique index on provider_session_id is what makes redelivered
//! checkout webhooks no-ops: INSERT OR IGNORE against it means exactly one
//! delivery creates the order.

#[path = "../common/mod.rs"]
mod common;

use common::*;
use rusqlite::Connection;

// ============ Order CRUD Tests ============

#[test]
fn test_create_and_get_order() {
    let conn = setup_test_db();
    let user = create_test_user(&conn, "buyer@example.com");

    let order = create_test_order(&conn, &user.id, 12_900, Some("YOGA-ANA"), Some("cs_123"));

    assert_eq!(order.user_id, user.id);
    assert_eq!(
        order.status,
        OrderStatus::Confirmed,
        "webhook-created orders start confirmed (payment already settled)"
    );
    assert_eq!(order.total_cents, 12_900);
    assert_eq!(order.currency, "usd");
    assert_eq!(order.referral_code.as_deref(), Some("YOGA-ANA"));
    assert_eq!(order.provider_session_id.as_deref(), Some("cs_123"));

    let by_id = queries::get_order_by_id(&conn, &order.id)
        .expect("query should succeed")
        .expect("order should exist");
    assert_eq!(by_id.id, order.id);
    assert_eq!(by_id.total_cents, order.total_cents);
    assert_eq!(by_id.created_at, order.created_at);

    let by_session = queries::get_order_by_session(&conn, "cs_123")
        .expect("query should succeed")
        .expect("order should be findable by provider session");
    assert_eq!(by_session.id, order.id);
}

#[test]
fn test_get_order_nonexistent() {
    let conn = setup_test_db();

    let missing = queries::get_order_by_id(&conn, "no-such-order").expect("query should succeed");
    assert!(missing.is_none());

    let missing = queries::get_order_by_session(&conn, "cs_missing").expect("query should succeed");
    assert!(missing.is_none());
}

// ============ Session Claim Tests ============

#[test]
fn test_try_create_order_claims_session_once() {
    let conn = setup_test_db();
    let user = create_test_user(&conn, "buyer@example.com");

    let input = CreateOrder {
        user_id: user.id.clone(),
        total_cents: 5_000,
        currency: "usd".to_string(),
        shipping_address: None,
        items: None,
        referral_code: None,
        provider_session_id: Some("cs_claim_once".to_string()),
    };

    let first = queries::try_create_order(&conn, &input).expect("first insert should not error");
    assert!(first.is_some(), "first delivery should create the order");

    let second = queries::try_create_order(&conn, &input).expect("second insert should not error");
    assert!(
        second.is_none(),
        "redelivery for the same session should be a no-op"
    );

    let (orders, total) =
        queries::list_orders(&conn, &OrderFilters::default(), 50, 0).expect("list should succeed");
    assert_eq!(total, 1, "exactly one order should exist");
    assert_eq!(orders.len(), 1);
}

#[test]
fn test_try_create_order_distinct_sessions_both_created() {
    let conn = setup_test_db();
    let user = create_test_user(&conn, "buyer@example.com");

    for session in ["cs_a", "cs_b"] {
        let input = CreateOrder {
            user_id: user.id.clone(),
            total_cents: 1_000,
            currency: "usd".to_string(),
            shipping_address: None,
            items: None,
            referral_code: None,
            provider_session_id: Some(session.to_string()),
        };
        let created = queries::try_create_order(&conn, &input).expect("insert should not error");
        assert!(created.is_some(), "session {} should create an order", session);
    }

    let (_, total) =
        queries::list_orders(&conn, &OrderFilters::default(), 50, 0).expect("list should succeed");
    assert_eq!(total, 2);
}

#[test]
fn test_orders_without_session_are_not_deduped() {
    // The unique index is partial (WHERE provider_session_id IS NOT NULL);
    // manually created orders without a session id must not collide.
    let conn = setup_test_db();
    let user = create_test_user(&conn, "buyer@example.com");

    create_test_order(&conn, &user.id, 1_000, None, None);
    create_test_order(&conn, &user.id, 2_000, None, None);

    let (_, total) =
        queries::list_orders(&conn, &OrderFilters::default(), 50, 0).expect("list should succeed");
    assert_eq!(total, 2, "sessionless orders should never dedupe each other");
}

#[test]
fn test_try_create_order_concurrent() {
    // Multiple threads race to claim the same checkout session. Exactly one
    // must win; the rest see the existing claim and back off.

    use std::sync::{Arc, Barrier};

    let num_threads = 5;
    let db_path = std::env::temp_dir().join(format!(
        "kickback_order_claim_{}.db",
        uuid::Uuid::new_v4()
    ));

    let conn = Connection::open(&db_path).expect("Failed to create test db");
    init_db(&conn).expect("Failed to init schema");
    let user = create_test_user(&conn, "buyer@example.com");
    let user_id = user.id.clone();
    drop(conn);

    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            let db_path = db_path.clone();
            let user_id = user_id.clone();

            std::thread::spawn(move || {
                let thread_conn = Connection::open(&db_path).expect("thread failed to open db");
                thread_conn
                    .busy_timeout(std::time::Duration::from_secs(5))
                    .expect("failed to set busy timeout");

                let input = CreateOrder {
                    user_id,
                    total_cents: 9_900,
                    currency: "usd".to_string(),
                    shipping_address: None,
                    items: None,
                    referral_code: None,
                    provider_session_id: Some("cs_contested".to_string()),
                };

                barrier.wait();

                queries::try_create_order(&thread_conn, &input)
                    .expect("try_create_order should not error")
                    .is_some()
            })
        })
        .collect();

    let results: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|&&won| won).count();

    assert_eq!(
        winners, 1,
        "exactly 1 of {} concurrent claims should create the order, got {}",
        num_threads, winners
    );

    let verify_conn = Connection::open(&db_path).expect("failed to open db for verification");
    let order = queries::get_order_by_session(&verify_conn, "cs_contested")
        .expect("query should succeed")
        .expect("order should exist");
    assert_eq!(order.total_cents, 9_900);

    std::fs::remove_file(&db_path).ok();
}

// ============ Status Update Tests ============

#[test]
fn test_update_order_status() {
    let conn = setup_test_db();
    let user = create_test_user(&conn, "buyer@example.com");
    let order = create_test_order(&conn, &user.id, 5_000, None, Some("cs_status"));

    let updated = queries::update_order_status(&conn, &order.id, OrderStatus::Shipped)
        .expect("update should succeed")
        .expect("order should exist");
    assert_eq!(updated.status, OrderStatus::Shipped);
    assert_eq!(updated.id, order.id);
    assert_eq!(
        updated.total_cents, order.total_cents,
        "status change must not touch the order contents"
    );

    let reloaded = queries::get_order_by_id(&conn, &order.id)
        .expect("query should succeed")
        .expect("order should exist");
    assert_eq!(reloaded.status, OrderStatus::Shipped);
}

#[test]
fn test_update_order_status_nonexistent() {
    let conn = setup_test_db();

    let updated = queries::update_order_status(&conn, "no-such-order", OrderStatus::Shipped)
        .expect("update should not error");
    assert!(updated.is_none(), "missing order should return None");
}

// ============ Listing Tests ============

#[test]
fn test_list_orders_filters() {
    let conn = setup_test_db();
    let alice = create_test_user(&conn, "alice@example.com");
    let bob = create_test_user(&conn, "bob@example.com");

    let shipped = create_test_order(&conn, &alice.id, 1_000, None, Some("cs_1"));
    create_test_order(&conn, &alice.id, 2_000, None, Some("cs_2"));
    create_test_order(&conn, &bob.id, 3_000, None, Some("cs_3"));

    queries::update_order_status(&conn, &shipped.id, OrderStatus::Shipped)
        .expect("update should succeed");

    let (all, total) =
        queries::list_orders(&conn, &OrderFilters::default(), 50, 0).expect("list should succeed");
    assert_eq!(total, 3);
    assert_eq!(all.len(), 3);

    let by_status = OrderFilters {
        status: Some(OrderStatus::Shipped),
        user_id: None,
    };
    let (shipped_orders, shipped_total) =
        queries::list_orders(&conn, &by_status, 50, 0).expect("list should succeed");
    assert_eq!(shipped_total, 1);
    assert_eq!(shipped_orders[0].id, shipped.id);

    let by_user = OrderFilters {
        status: None,
        user_id: Some(alice.id.clone()),
    };
    let (alice_orders, alice_total) =
        queries::list_orders(&conn, &by_user, 50, 0).expect("list should succeed");
    assert_eq!(alice_total, 2);
    assert!(alice_orders.iter().all(|o| o.user_id == alice.id));

    let combined = OrderFilters {
        status: Some(OrderStatus::Shipped),
        user_id: Some(bob.id.clone()),
    };
    let (_, combined_total) =
        queries::list_orders(&conn, &combined, 50, 0).expect("list should succeed");
    assert_eq!(combined_total, 0, "bob has no shipped orders");
}

#[test]
fn test_list_orders_newest_first_with_pagination() {
    let conn = setup_test_db();
    let user = create_test_user(&conn, "buyer@example.com");

    let oldest = create_test_order(&conn, &user.id, 1_000, None, Some("cs_old"));
    let middle = create_test_order(&conn, &user.id, 2_000, None, Some("cs_mid"));
    let newest = create_test_order(&conn, &user.id, 3_000, None, Some("cs_new"));

    // Spread creation times so the ordering is deterministic
    let base = now();
    for (order_id, age) in [(&oldest.id, 30), (&middle.id, 20), (&newest.id, 10)] {
        conn.execute(
            "UPDATE orders SET created_at = ?1 WHERE id = ?2",
            rusqlite::params![base - age, order_id],
        )
        .expect("failed to set timestamp");
    }

    let (page, total) =
        queries::list_orders(&conn, &OrderFilters::default(), 2, 0).expect("list should succeed");
    assert_eq!(total, 3, "total counts all matches, not just this page");
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].id, newest.id, "newest order comes first");
    assert_eq!(page[1].id, middle.id);

    let (rest, _) =
        queries::list_orders(&conn, &OrderFilters::default(), 2, 2).expect("list should succeed");
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].id, oldest.id);
}
