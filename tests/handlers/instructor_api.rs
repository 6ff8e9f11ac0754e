//! Instructor API tests - bearer auth, earnings, ledger reads, and payout
//! preflight checks. Payout paths that reach the payment provider are
//! covered down to the last local step (the reservation).

#[path = "../common/mod.rs"]
mod common;

use common::*;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::json;
use tower::ServiceExt;

fn instructor_app(state: AppState) -> Router {
    kickback::handlers::instructors::router(state.clone()).with_state(state)
}

fn get_with_token(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ============ Authentication ============

#[tokio::test]
async fn test_missing_token_unauthorized() {
    let app = instructor_app(create_test_app_state());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/instructor/earnings")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_token_unauthorized() {
    let app = instructor_app(create_test_app_state());

    let response = app
        .oneshot(get_with_token("/instructor/earnings", "not_a_real_token"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

/// Cancellation ends the subscription, not ledger access: a canceled
/// instructor can still read what they earned.
#[tokio::test]
async fn test_canceled_instructor_still_reads_ledger() {
    let state = create_test_app_state();
    let token;
    {
        let conn = state.db.get().unwrap();
        let instructor = create_test_instructor(&conn, "ana@example.com", "YOGA-ANA", None);
        create_test_commission(
            &conn,
            &instructor.id,
            CommissionType::Direct,
            None,
            10_000,
            Some("cs_hist"),
        );
        queries::set_instructor_status(&conn, &instructor.id, InstructorStatus::Canceled).unwrap();
        token = instructor.api_token;
    }

    let app = instructor_app(state);
    let response = app
        .oneshot(get_with_token("/instructor/earnings", &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["total_earned_cents"], 2_500);
}

// ============ Earnings ============

#[tokio::test]
async fn test_earnings_reflect_ledger() {
    let state = create_test_app_state();
    let token;
    {
        let conn = state.db.get().unwrap();
        let instructor = create_test_instructor(&conn, "ana@example.com", "YOGA-ANA", None);
        create_test_commission(
            &conn,
            &instructor.id,
            CommissionType::Direct,
            None,
            10_000,
            Some("cs_1"),
        );
        create_test_commission(
            &conn,
            &instructor.id,
            CommissionType::InstructorReferral,
            None,
            0,
            Some("sub_x"),
        );
        token = instructor.api_token;
    }

    let app = instructor_app(state);
    let response = app
        .oneshot(get_with_token("/instructor/earnings", &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["total_earned_cents"], 7_500);
    assert_eq!(body["direct_cents"], 2_500);
    assert_eq!(body["referral_cents"], 0);
    assert_eq!(body["instructor_referral_cents"], 5_000);
    assert_eq!(body["paid_out_cents"], 0);
    assert_eq!(body["available_cents"], 7_500);
}

// ============ Commission Ledger ============

#[tokio::test]
async fn test_commissions_filter_and_pagination() {
    let state = create_test_app_state();
    let token;
    {
        let conn = state.db.get().unwrap();
        let instructor = create_test_instructor(&conn, "ana@example.com", "YOGA-ANA", None);
        let settled = create_test_commission(
            &conn,
            &instructor.id,
            CommissionType::Direct,
            None,
            10_000,
            Some("cs_1"),
        );
        create_test_commission(
            &conn,
            &instructor.id,
            CommissionType::Direct,
            None,
            8_000,
            Some("cs_2"),
        );
        create_test_commission(
            &conn,
            &instructor.id,
            CommissionType::Direct,
            None,
            6_000,
            Some("cs_3"),
        );
        // One row settled by a past payout
        conn.execute(
            "UPDATE commissions SET paid_out = 1 WHERE id = ?1",
            rusqlite::params![settled.id],
        )
        .unwrap();
        token = instructor.api_token;
    }

    let app = instructor_app(state.clone());
    let response = app
        .oneshot(get_with_token("/instructor/commissions?limit=2", &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["total"], 3);
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
    assert_eq!(body["limit"], 2);

    let app = instructor_app(state.clone());
    let response = app
        .oneshot(get_with_token(
            "/instructor/commissions?paid_out=false",
            &token,
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["total"], 2, "The settled row is filtered out");
    assert!(
        body["items"]
            .as_array()
            .unwrap()
            .iter()
            .all(|c| c["paid_out"] == false)
    );
}

// ============ Payout Preflight ============

#[tokio::test]
async fn test_payout_without_account_rejected() {
    let state = create_test_app_state();
    let token;
    {
        let conn = state.db.get().unwrap();
        let instructor = create_test_instructor(&conn, "ana@example.com", "YOGA-ANA", None);
        create_test_commission(
            &conn,
            &instructor.id,
            CommissionType::Direct,
            None,
            10_000,
            Some("cs_1"),
        );
        token = instructor.api_token;
    }

    let app = instructor_app(state);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/instructor/payouts")
                .header("authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        response.status(),
        StatusCode::UNPROCESSABLE_ENTITY,
        "Balance alone is not enough without a payout account"
    );

    let body = body_json(response).await;
    assert_eq!(body["error"], "Not onboarded");
}

#[tokio::test]
async fn test_payout_with_unfinished_onboarding_rejected() {
    let state = create_test_app_state();
    let token;
    {
        let conn = state.db.get().unwrap();
        let instructor = create_test_instructor(&conn, "ana@example.com", "YOGA-ANA", None);
        create_test_commission(
            &conn,
            &instructor.id,
            CommissionType::Direct,
            None,
            10_000,
            Some("cs_1"),
        );
        // Account connected but provider-side onboarding incomplete
        queries::set_instructor_payout_account(&conn, &instructor.id, "acct_half", false)
            .unwrap()
            .unwrap();
        token = instructor.api_token;
    }

    let app = instructor_app(state);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/instructor/payouts")
                .header("authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_payout_with_no_balance_rejected() {
    let state = create_test_app_state();
    let token;
    {
        let conn = state.db.get().unwrap();
        let instructor = create_test_instructor(&conn, "ana@example.com", "YOGA-ANA", None);
        onboard_test_instructor(&conn, &instructor.id);
        token = instructor.api_token;
    }

    let app = instructor_app(state);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/instructor/payouts")
                .header("authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = body_json(response).await;
    assert_eq!(body["error"], "Insufficient balance");
}

// ============ Payout Status ============

#[tokio::test]
async fn test_payout_status_overview() {
    let state = create_test_app_state();
    let token;
    {
        let mut conn = state.db.get().unwrap();
        let instructor = create_test_instructor(&conn, "ana@example.com", "YOGA-ANA", None);
        create_test_commission(
            &conn,
            &instructor.id,
            CommissionType::Direct,
            None,
            10_000,
            Some("cs_1"),
        );
        let request = queries::reserve_payout(&mut conn, &instructor.id).unwrap();
        queries::fail_payout_request(&mut conn, &request.id, "account frozen")
            .unwrap()
            .unwrap();
        token = instructor.api_token;
    }

    let app = instructor_app(state.clone());
    let response = app
        .oneshot(get_with_token("/instructor/payouts", &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(
        body["summary"]["available_cents"], 2_500,
        "Failed payout released the reservation"
    );
    assert_eq!(body["requests"]["total"], 1);
    assert_eq!(body["requests"]["items"][0]["status"], "failed");
    assert_eq!(body["requests"]["items"][0]["failure_reason"], "account frozen");

    let app = instructor_app(state.clone());
    let response = app
        .oneshot(get_with_token("/instructor/payouts?status=completed", &token))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["requests"]["total"], 0, "Status filter applies to history");
}

#[tokio::test]
async fn test_payout_request_ownership_masked() {
    let state = create_test_app_state();
    let (ana_token, ben_token, request_id);
    {
        let mut conn = state.db.get().unwrap();
        let ana = create_test_instructor(&conn, "ana@example.com", "YOGA-ANA", None);
        let ben = create_test_instructor(&conn, "ben@example.com", "BARRE-BEN", None);
        create_test_commission(
            &conn,
            &ana.id,
            CommissionType::Direct,
            None,
            10_000,
            Some("cs_1"),
        );
        let request = queries::reserve_payout(&mut conn, &ana.id).unwrap();
        ana_token = ana.api_token;
        ben_token = ben.api_token;
        request_id = request.id;
    }

    let uri = format!("/instructor/payouts/{}", request_id);

    let app = instructor_app(state.clone());
    let response = app.oneshot(get_with_token(&uri, &ben_token)).await.unwrap();
    assert_eq!(
        response.status(),
        StatusCode::NOT_FOUND,
        "Another instructor's request reads as missing, not forbidden"
    );

    let app = instructor_app(state.clone());
    let response = app.oneshot(get_with_token(&uri, &ana_token)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["amount_cents"], 2_500);
}

// ============ Payout Account ============

#[tokio::test]
async fn test_update_payout_account_blank_rejected() {
    let state = create_test_app_state();
    let token;
    {
        let conn = state.db.get().unwrap();
        let instructor = create_test_instructor(&conn, "ana@example.com", "YOGA-ANA", None);
        token = instructor.api_token;
    }

    let app = instructor_app(state);
    let payload = json!({ "payout_account_id": "   " });
    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/instructor/payout-account")
                .header("authorization", format!("Bearer {}", token))
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&payload).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
