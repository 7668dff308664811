mod common;

use axum::http::StatusCode;
use common::{decimal, student, TestApp, CLASS, GUARDIAN, STUDENT};
use rust_decimal_macros::dec;
use serde_json::json;

async fn pay(app: &TestApp, student_id: &str, amount: &str, method: &str) -> serde_json::Value {
    let (status, body) = app
        .as_bursar(
            "POST",
            "/payments",
            Some(json!({ "student_id": student_id, "amount": amount, "method": method })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body
}

#[tokio::test]
async fn balance_is_due_minus_completed_payments() {
    let app = TestApp::spawn().await;
    app.assign_fee(dec!(1500)).await;
    pay(&app, STUDENT, "400", "CASH").await;
    let voided = pay(&app, STUDENT, "200", "BANK_DEPOSIT").await;

    let (status, _) = app
        .as_bursar(
            "PUT",
            &format!("/payments/{}/void", voided["id"].as_str().unwrap()),
            Some(json!({ "reason": "Bounced" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .as_bursar("GET", &format!("/students/{STUDENT}/balance"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&body["total_due"]), dec!(1500));
    assert_eq!(decimal(&body["total_paid"]), dec!(400));
    assert_eq!(decimal(&body["balance"]), dec!(1100));
    assert_eq!(body["obligations"], 1);
}

#[tokio::test]
async fn overpayment_shows_as_credit() {
    let app = TestApp::spawn().await;
    app.assign_fee(dec!(300)).await;
    pay(&app, STUDENT, "500", "CASH").await;

    assert_eq!(app.balance(STUDENT).await, dec!(-200));
}

#[tokio::test]
async fn guardian_sees_only_linked_students() {
    let app = TestApp::spawn().await;
    let mut other = student("student-9", CLASS);
    other.guardian_ids = vec!["someone-else".to_string()];
    other.guardian_email = None;
    app.store.add_student(other);

    let (status, _) = app
        .call("GET", &format!("/students/{STUDENT}/balance"), GUARDIAN, "guardian", None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .call("GET", "/students/student-9/balance", GUARDIAN, "guardian", None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_student_is_not_found() {
    let app = TestApp::spawn().await;
    let (status, _) = app.as_bursar("GET", "/students/nobody/balance", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn finance_summary_aggregates_the_tenant() {
    let app = TestApp::spawn().await;
    app.store.add_student(student("student-2", CLASS));
    app.assign_fee(dec!(1000)).await;
    pay(&app, STUDENT, "1000", "CASH").await;
    pay(&app, "student-2", "250", "BANK_DEPOSIT").await;

    let (status, body) = app.as_bursar("GET", "/finance/summary", None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(decimal(&body["total_due"]), dec!(2000));
    assert_eq!(decimal(&body["total_collected"]), dec!(1250));
    assert_eq!(decimal(&body["outstanding"]), dec!(750));
    assert_eq!(body["overdue_students"], 1);
    assert_eq!(body["completed_payments"], 2);
    assert_eq!(decimal(&body["collected_by_method"]["CASH"]), dec!(1000));
    assert_eq!(decimal(&body["collected_by_method"]["BANK_DEPOSIT"]), dec!(250));

    let (status, _) = app
        .call("GET", "/finance/summary", GUARDIAN, "guardian", None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
