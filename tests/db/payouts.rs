//! Payout reservation lifecycle tests
//!
//! A payout request is a reservation: created `processing` for the full
//! available balance inside an IMMEDIATE transaction that also stamps the
//! unpaid commission rows it covers. Completion flips exactly those rows to
//! paid; failure releases them unchanged.

#[path = "../common/mod.rs"]
mod common;

use common::*;
use kickback::error::AppError;
use rusqlite::Connection;

// ============ Reservation Tests ============

#[test]
fn test_reserve_payout_with_no_earnings() {
    let mut conn = setup_test_db();
    let instructor = create_test_instructor(&conn, "ana@example.com", "YOGA-ANA", None);

    let result = queries::reserve_payout(&mut conn, &instructor.id);
    assert!(
        matches!(result, Err(AppError::InsufficientBalance(_))),
        "zero balance should be rejected, got {:?}",
        result
    );
}

#[test]
fn test_reserve_payout_below_minimum() {
    let mut conn = setup_test_db();
    let instructor = create_test_instructor(&conn, "ana@example.com", "YOGA-ANA", None);
    // 25% of a $2.00 order is 50 cents, under the $1.00 minimum
    create_test_commission(&conn, &instructor.id, CommissionType::Direct, None, 200, Some("cs_1"));

    let result = queries::reserve_payout(&mut conn, &instructor.id);
    assert!(
        matches!(result, Err(AppError::InsufficientBalance(_))),
        "balance under the payout minimum should be rejected, got {:?}",
        result
    );

    let summary =
        queries::earnings_summary(&conn, &instructor.id).expect("summary should succeed");
    assert_eq!(
        summary.pending_payout_cents, 0,
        "a rejected reservation must leave nothing in flight"
    );
}

#[test]
fn test_reserve_payout_at_exact_minimum() {
    let mut conn = setup_test_db();
    let instructor = create_test_instructor(&conn, "ana@example.com", "YOGA-ANA", None);
    create_test_commission(&conn, &instructor.id, CommissionType::Direct, None, 400, Some("cs_1"));

    let request =
        queries::reserve_payout(&mut conn, &instructor.id).expect("exactly $1.00 should reserve");
    assert_eq!(request.amount_cents, 100);
    assert_eq!(request.status, PayoutStatus::Processing);
}

#[test]
fn test_reserve_payout_takes_full_balance_and_stamps_rows() {
    let mut conn = setup_test_db();
    let instructor = create_test_instructor(&conn, "ana@example.com", "YOGA-ANA", None);
    create_test_commission(&conn, &instructor.id, CommissionType::Direct, None, 10_000, Some("cs_1"));
    create_test_commission(&conn, &instructor.id, CommissionType::Referral, None, 10_000, Some("cs_2"));

    let request =
        queries::reserve_payout(&mut conn, &instructor.id).expect("reservation should succeed");

    assert_eq!(
        request.amount_cents, 3_500,
        "reservation covers the full available balance, not a chosen amount"
    );
    assert_eq!(request.status, PayoutStatus::Processing);
    assert_eq!(request.instructor_id, instructor.id);
    assert!(request.provider_transfer_id.is_none());

    let (rows, _) =
        queries::list_commissions(&conn, &instructor.id, &CommissionFilters::default(), 50, 0)
            .expect("list should succeed");
    assert!(
        rows.iter()
            .all(|c| c.payout_request_id.as_deref() == Some(request.id.as_str())),
        "every unpaid row should be stamped with the reservation id"
    );
    assert!(
        rows.iter().all(|c| !c.paid_out),
        "reservation stamps rows but does not pay them"
    );

    let balance =
        queries::available_balance(&conn, &instructor.id).expect("balance should succeed");
    assert_eq!(balance, 0, "the reservation consumes the whole balance");

    let second = queries::reserve_payout(&mut conn, &instructor.id);
    assert!(
        matches!(second, Err(AppError::InsufficientBalance(_))),
        "a second reservation while one is processing should find nothing left"
    );
}

#[test]
fn test_reserve_payout_concurrent() {
    // Concurrent payout requests race on the same balance. The IMMEDIATE
    // transaction in reserve_payout means exactly one wins; the others see a
    // zero balance once they get the write lock.

    use std::sync::{Arc, Barrier};

    let num_threads = 5;
    let db_path = std::env::temp_dir().join(format!(
        "kickback_reserve_concurrent_{}.db",
        uuid::Uuid::new_v4()
    ));

    let conn = Connection::open(&db_path).expect("Failed to create test db");
    init_db(&conn).expect("Failed to init schema");
    let instructor = create_test_instructor(&conn, "ana@example.com", "YOGA-ANA", None);
    create_test_commission(&conn, &instructor.id, CommissionType::Direct, None, 16_800, Some("cs_1"));
    let instructor_id = instructor.id.clone();
    drop(conn);

    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            let db_path = db_path.clone();
            let instructor_id = instructor_id.clone();

            std::thread::spawn(move || {
                let mut thread_conn =
                    Connection::open(&db_path).expect("thread failed to open db");
                thread_conn
                    .busy_timeout(std::time::Duration::from_secs(5))
                    .expect("failed to set busy timeout");

                barrier.wait();

                queries::reserve_payout(&mut thread_conn, &instructor_id)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<_> = results.iter().filter(|r| r.is_ok()).collect();

    assert_eq!(
        winners.len(),
        1,
        "exactly 1 of {} concurrent reservations should win, got {}",
        num_threads,
        winners.len()
    );
    assert!(
        results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| matches!(r, Err(AppError::InsufficientBalance(_)))),
        "losers should see an already-reserved balance"
    );

    let verify_conn = Connection::open(&db_path).expect("failed to open db for verification");
    let (requests, total) = queries::list_payout_requests(
        &verify_conn,
        Some(&instructor_id),
        &PayoutFilters::default(),
        50,
        0,
    )
    .expect("list should succeed");
    assert_eq!(total, 1, "only the winning reservation should exist");
    assert_eq!(requests[0].amount_cents, 4_200);

    std::fs::remove_file(&db_path).ok();
}

// ============ Completion Tests ============

#[test]
fn test_complete_payout_request_flips_reserved_rows() {
    let mut conn = setup_test_db();
    let instructor = create_test_instructor(&conn, "ana@example.com", "YOGA-ANA", None);
    create_test_commission(&conn, &instructor.id, CommissionType::Direct, None, 10_000, Some("cs_1"));

    let request =
        queries::reserve_payout(&mut conn, &instructor.id).expect("reservation should succeed");

    let completed = queries::complete_payout_request(&mut conn, &request.id, "tr_abc123")
        .expect("completion should not error")
        .expect("processing request should complete");

    assert_eq!(completed.status, PayoutStatus::Completed);
    assert_eq!(completed.provider_transfer_id.as_deref(), Some("tr_abc123"));
    assert_eq!(completed.amount_cents, 2_500);

    let (rows, _) =
        queries::list_commissions(&conn, &instructor.id, &CommissionFilters::default(), 50, 0)
            .expect("list should succeed");
    assert!(
        rows.iter().all(|c| c.paid_out),
        "completion flips every reserved row to paid"
    );

    let summary =
        queries::earnings_summary(&conn, &instructor.id).expect("summary should succeed");
    assert_eq!(summary.paid_out_cents, 2_500);
    assert_eq!(summary.pending_payout_cents, 0, "nothing is in flight anymore");
    assert_eq!(summary.available_cents, 0);
    assert_eq!(
        summary.total_earned_cents, 2_500,
        "lifetime earnings are unchanged by a payout"
    );
}

#[test]
fn test_complete_payout_request_is_single_shot() {
    let mut conn = setup_test_db();
    let instructor = create_test_instructor(&conn, "ana@example.com", "YOGA-ANA", None);
    create_test_commission(&conn, &instructor.id, CommissionType::Direct, None, 10_000, Some("cs_1"));

    let request =
        queries::reserve_payout(&mut conn, &instructor.id).expect("reservation should succeed");
    queries::complete_payout_request(&mut conn, &request.id, "tr_1")
        .expect("completion should not error")
        .expect("request should complete");

    let again = queries::complete_payout_request(&mut conn, &request.id, "tr_2")
        .expect("second completion should not error");
    assert!(
        again.is_none(),
        "completing a non-processing request must return None for reconciliation"
    );

    let reloaded = queries::get_payout_request(&conn, &request.id)
        .expect("query should succeed")
        .expect("request should exist");
    assert_eq!(
        reloaded.provider_transfer_id.as_deref(),
        Some("tr_1"),
        "the original transfer id must survive the replay"
    );
}

#[test]
fn test_complete_unknown_request_returns_none() {
    let mut conn = setup_test_db();

    let result = queries::complete_payout_request(&mut conn, "no-such-request", "tr_1")
        .expect("completion should not error");
    assert!(result.is_none());
}

// ============ Failure Tests ============

#[test]
fn test_fail_payout_request_releases_reservation() {
    let mut conn = setup_test_db();
    let instructor = create_test_instructor(&conn, "ana@example.com", "YOGA-ANA", None);
    create_test_commission(&conn, &instructor.id, CommissionType::Direct, None, 10_000, Some("cs_1"));

    let request =
        queries::reserve_payout(&mut conn, &instructor.id).expect("reservation should succeed");

    let failed = queries::fail_payout_request(&mut conn, &request.id, "account frozen")
        .expect("failure marking should not error")
        .expect("processing request should fail");

    assert_eq!(failed.status, PayoutStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("account frozen"));

    let (rows, _) =
        queries::list_commissions(&conn, &instructor.id, &CommissionFilters::default(), 50, 0)
            .expect("list should succeed");
    assert!(
        rows.iter().all(|c| c.payout_request_id.is_none() && !c.paid_out),
        "failure returns the reserved rows to the unreserved pool untouched"
    );

    let balance =
        queries::available_balance(&conn, &instructor.id).expect("balance should succeed");
    assert_eq!(balance, 2_500, "the failed attempt restores the full balance");

    // A retry is a brand new request for the same amount
    let retry =
        queries::reserve_payout(&mut conn, &instructor.id).expect("retry should reserve again");
    assert_eq!(retry.amount_cents, 2_500);
    assert_ne!(retry.id, request.id);
}

#[test]
fn test_complete_after_fail_returns_none() {
    let mut conn = setup_test_db();
    let instructor = create_test_instructor(&conn, "ana@example.com", "YOGA-ANA", None);
    create_test_commission(&conn, &instructor.id, CommissionType::Direct, None, 10_000, Some("cs_1"));

    let request =
        queries::reserve_payout(&mut conn, &instructor.id).expect("reservation should succeed");
    queries::fail_payout_request(&mut conn, &request.id, "transfer rejected")
        .expect("failure marking should not error")
        .expect("request should fail");

    let result = queries::complete_payout_request(&mut conn, &request.id, "tr_late")
        .expect("completion should not error");
    assert!(
        result.is_none(),
        "a failed request is terminal; a late transfer success is a reconciliation case"
    );
}

// ============ Reservation Scope Tests ============

#[test]
fn test_rows_earned_after_reservation_stay_unreserved() {
    let mut conn = setup_test_db();
    let instructor = create_test_instructor(&conn, "ana@example.com", "YOGA-ANA", None);
    create_test_commission(&conn, &instructor.id, CommissionType::Direct, None, 10_000, Some("cs_1"));

    let request =
        queries::reserve_payout(&mut conn, &instructor.id).expect("reservation should succeed");

    // A sale lands while the payout is in flight
    let late =
        create_test_commission(&conn, &instructor.id, CommissionType::Direct, None, 4_000, Some("cs_2"));

    queries::complete_payout_request(&mut conn, &request.id, "tr_1")
        .expect("completion should not error")
        .expect("request should complete");

    let reloaded_late = queries::list_commissions(
        &conn,
        &instructor.id,
        &CommissionFilters {
            paid_out: Some(false),
        },
        50,
        0,
    )
    .expect("list should succeed");
    assert_eq!(reloaded_late.0.len(), 1, "the late sale must not be swept into the payout");
    assert_eq!(reloaded_late.0[0].id, late.id);
    assert!(reloaded_late.0[0].payout_request_id.is_none());

    let balance =
        queries::available_balance(&conn, &instructor.id).expect("balance should succeed");
    assert_eq!(balance, 1_000, "the late sale is still available for the next payout");
}

// ============ Lookup and Listing Tests ============

#[test]
fn test_get_payout_request_roundtrip() {
    let mut conn = setup_test_db();
    let instructor = create_test_instructor(&conn, "ana@example.com", "YOGA-ANA", None);
    create_test_commission(&conn, &instructor.id, CommissionType::Direct, None, 10_000, Some("cs_1"));

    let request =
        queries::reserve_payout(&mut conn, &instructor.id).expect("reservation should succeed");

    let reloaded = queries::get_payout_request(&conn, &request.id)
        .expect("query should succeed")
        .expect("request should exist");
    assert_eq!(reloaded.id, request.id);
    assert_eq!(reloaded.amount_cents, request.amount_cents);
    assert_eq!(reloaded.status, PayoutStatus::Processing);

    let missing =
        queries::get_payout_request(&conn, "no-such-request").expect("query should succeed");
    assert!(missing.is_none());
}

#[test]
fn test_list_payout_requests_scoping_and_filters() {
    let mut conn = setup_test_db();
    let ana = create_test_instructor(&conn, "ana@example.com", "YOGA-ANA", None);
    let ben = create_test_instructor(&conn, "ben@example.com", "LIFT-BEN", None);
    create_test_commission(&conn, &ana.id, CommissionType::Direct, None, 10_000, Some("cs_a"));
    create_test_commission(&conn, &ben.id, CommissionType::Direct, None, 4_000, Some("cs_b"));

    let ana_request =
        queries::reserve_payout(&mut conn, &ana.id).expect("reservation should succeed");
    let ben_request =
        queries::reserve_payout(&mut conn, &ben.id).expect("reservation should succeed");
    queries::complete_payout_request(&mut conn, &ben_request.id, "tr_ben")
        .expect("completion should not error")
        .expect("request should complete");

    // Scoped to one instructor
    let (ana_rows, ana_total) = queries::list_payout_requests(
        &conn,
        Some(&ana.id),
        &PayoutFilters::default(),
        50,
        0,
    )
    .expect("list should succeed");
    assert_eq!(ana_total, 1);
    assert_eq!(ana_rows[0].id, ana_request.id);

    // Admin view across all instructors
    let (_, all_total) =
        queries::list_payout_requests(&conn, None, &PayoutFilters::default(), 50, 0)
            .expect("list should succeed");
    assert_eq!(all_total, 2);

    // Status filter on the admin view
    let completed = PayoutFilters {
        status: Some(PayoutStatus::Completed),
    };
    let (completed_rows, completed_total) =
        queries::list_payout_requests(&conn, None, &completed, 50, 0)
            .expect("list should succeed");
    assert_eq!(completed_total, 1);
    assert_eq!(completed_rows[0].id, ben_request.id);
}
