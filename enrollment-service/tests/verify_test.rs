//! Verification pipeline integration tests.
//!
//! Run with: TEST_DATABASE_URL=... cargo test -- --ignored

mod common;

use common::{spawn_app, spawn_app_with_rate_limit, unique_reference};
use rust_decimal_macros::dec;
use serde_json::Value;
use uuid::Uuid;

#[tokio::test]
#[ignore]
async fn successful_verification_enrolls_user() {
    let app = spawn_app().await;
    let course_id = app.seed_course(dec!(5000)).await;
    let user_id = Uuid::new_v4();
    let reference = unique_reference("ref");

    // 500000 kobo reconciles to 5000.00 naira.
    app.mock_verify_success(&reference, 500_000, "NGN").await;

    let response = app.verify(user_id, &reference, course_id).await;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["already_enrolled"], false);
    assert_eq!(body["course_id"], course_id.to_string());
    assert!(!body["payment_id"].as_str().unwrap().is_empty());
    assert!(!body["enrollment_id"].as_str().unwrap().is_empty());

    assert_eq!(app.count_payments(&reference).await, 1);
    assert_eq!(app.count_active_enrollments(user_id, course_id).await, 1);
}

#[tokio::test]
#[ignore]
async fn duplicate_submission_returns_same_ids() {
    let app = spawn_app().await;
    let course_id = app.seed_course(dec!(5000)).await;
    let user_id = Uuid::new_v4();
    let reference = unique_reference("ref");

    app.mock_verify_success(&reference, 500_000, "NGN").await;

    let first: Value = app
        .verify(user_id, &reference, course_id)
        .await
        .json()
        .await
        .unwrap();

    let response = app.verify(user_id, &reference, course_id).await;
    assert_eq!(response.status(), 200);
    let second: Value = response.json().await.unwrap();

    assert_eq!(second["already_enrolled"], true);
    assert_eq!(second["payment_id"], first["payment_id"]);
    assert_eq!(second["enrollment_id"], first["enrollment_id"]);

    assert_eq!(app.count_payments(&reference).await, 1);
    assert_eq!(app.count_active_enrollments(user_id, course_id).await, 1);
}

#[tokio::test]
#[ignore]
async fn concurrent_submissions_commit_exactly_once() {
    let app = spawn_app().await;
    let course_id = app.seed_course(dec!(5000)).await;
    let user_id = Uuid::new_v4();
    let reference = unique_reference("ref");

    app.mock_verify_success(&reference, 500_000, "NGN").await;

    let (first, second) = tokio::join!(
        app.verify(user_id, &reference, course_id),
        app.verify(user_id, &reference, course_id),
    );

    assert_eq!(first.status(), 200);
    assert_eq!(second.status(), 200);

    let first: Value = first.json().await.unwrap();
    let second: Value = second.json().await.unwrap();

    // All callers converge on the same canonical rows.
    assert_eq!(first["payment_id"], second["payment_id"]);
    assert_eq!(first["enrollment_id"], second["enrollment_id"]);

    assert_eq!(app.count_payments(&reference).await, 1);
    assert_eq!(app.count_active_enrollments(user_id, course_id).await, 1);
}

#[tokio::test]
#[ignore]
async fn amount_mismatch_is_rejected_without_side_effects() {
    let app = spawn_app().await;
    let course_id = app.seed_course(dec!(5000)).await;
    let user_id = Uuid::new_v4();
    let reference = unique_reference("ref");

    // Provider reports 400000 kobo (4000.00) against a 5000 course.
    app.mock_verify_success(&reference, 400_000, "NGN").await;

    let response = app.verify(user_id, &reference, course_id).await;
    assert_eq!(response.status(), 402);

    assert_eq!(app.count_payments(&reference).await, 0);
    assert_eq!(app.count_active_enrollments(user_id, course_id).await, 0);
}

#[tokio::test]
#[ignore]
async fn second_reference_reuses_active_enrollment() {
    let app = spawn_app().await;
    let course_id = app.seed_course(dec!(5000)).await;
    let user_id = Uuid::new_v4();
    let first_ref = unique_reference("ref");
    let second_ref = unique_reference("ref");

    app.mock_verify_success(&first_ref, 500_000, "NGN").await;
    app.mock_verify_success(&second_ref, 500_000, "NGN").await;

    let first: Value = app
        .verify(user_id, &first_ref, course_id)
        .await
        .json()
        .await
        .unwrap();

    let response = app.verify(user_id, &second_ref, course_id).await;
    assert_eq!(response.status(), 200);
    let second: Value = response.json().await.unwrap();

    // A re-purchase records its payment but never a second active enrollment.
    assert_eq!(second["already_enrolled"], true);
    assert_eq!(second["enrollment_id"], first["enrollment_id"]);
    assert_ne!(second["payment_id"], first["payment_id"]);

    assert_eq!(app.count_active_enrollments(user_id, course_id).await, 1);
}

#[tokio::test]
#[ignore]
async fn failed_provider_transaction_is_rejected() {
    let app = spawn_app().await;
    let course_id = app.seed_course(dec!(5000)).await;
    let user_id = Uuid::new_v4();
    let reference = unique_reference("ref");

    app.mock_verify_failed(&reference).await;

    let response = app.verify(user_id, &reference, course_id).await;
    assert_eq!(response.status(), 402);

    assert_eq!(app.count_payments(&reference).await, 0);
}

#[tokio::test]
#[ignore]
async fn provider_outage_is_retryable_by_client() {
    let app = spawn_app().await;
    let course_id = app.seed_course(dec!(5000)).await;
    let user_id = Uuid::new_v4();
    let reference = unique_reference("ref");

    app.mock_verify_outage(&reference).await;

    let response = app.verify(user_id, &reference, course_id).await;
    assert_eq!(response.status(), 502);

    assert_eq!(app.count_payments(&reference).await, 0);
}

#[tokio::test]
#[ignore]
async fn unknown_course_returns_not_found() {
    let app = spawn_app().await;
    let user_id = Uuid::new_v4();
    let reference = unique_reference("ref");

    let response = app.verify(user_id, &reference, Uuid::new_v4()).await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
#[ignore]
async fn missing_identity_is_unauthorized() {
    let app = spawn_app().await;
    let course_id = app.seed_course(dec!(5000)).await;

    let response = app
        .client
        .post(format!("{}/enrollments/verify", app.address))
        .json(&serde_json::json!({ "reference": "ref-001", "course_id": course_id }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
}

#[tokio::test]
#[ignore]
async fn malformed_reference_is_rejected_before_provider_work() {
    let app = spawn_app().await;
    let course_id = app.seed_course(dec!(5000)).await;
    let user_id = Uuid::new_v4();

    // No Paystack mock mounted: a provider call would fail the test server
    // with an unexpected-request error.
    let response = app.verify(user_id, "ref 001", course_id).await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
#[ignore]
async fn rate_limit_rejects_excess_attempts() {
    let app = spawn_app_with_rate_limit(3).await;
    let course_id = app.seed_course(dec!(5000)).await;
    let user_id = Uuid::new_v4();
    let other_user = Uuid::new_v4();
    let reference = unique_reference("ref");

    app.mock_verify_failed(&reference).await;

    for _ in 0..3 {
        let response = app.verify(user_id, &reference, course_id).await;
        assert_ne!(response.status(), 429);
    }

    let response = app.verify(user_id, &reference, course_id).await;
    assert_eq!(response.status(), 429);
    assert!(response.headers().get("retry-after").is_some());

    // One user's retries cannot exhaust another's quota.
    let response = app.verify(other_user, &reference, course_id).await;
    assert_ne!(response.status(), 429);
}
