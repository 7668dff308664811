mod common;

use axum::http::StatusCode;
use common::{
    decimal, TestApp, BURSAR, GUARDIAN, GUARDIAN_EMAIL, OTHER_STUDENT, OTHER_TENANT, STUDENT,
};
use rust_decimal_macros::dec;
use serde_json::json;
use settlement_service::models::{Payment, PaymentStatus};
use settlement_service::config::PaymentSettings;
use settlement_service::services::MockGateway;
use std::time::Duration;

fn payment(body: serde_json::Value) -> Payment {
    serde_json::from_value(body).unwrap()
}

#[tokio::test]
async fn cash_payment_settles_immediately_and_reduces_balance() {
    let app = TestApp::spawn().await;
    app.assign_fee(dec!(1000)).await;
    assert_eq!(app.balance(STUDENT).await, dec!(1000));

    let (status, body) = app
        .as_bursar(
            "POST",
            "/payments",
            Some(json!({ "student_id": STUDENT, "amount": "500", "method": "CASH" })),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED, "{body}");
    let recorded = payment(body);
    assert_eq!(recorded.status, PaymentStatus::Completed);
    assert!(recorded.transaction_id.starts_with("TXN-"));
    assert!(recorded.completed_at.is_some());
    assert_eq!(app.balance(STUDENT).await, dec!(500));

    app.wait_for_notifications(1).await;
    assert_eq!(app.notifier.delivered()[0].name(), "payment_receipt");
}

#[tokio::test]
async fn mobile_money_applies_surcharge_and_waits_for_gateway() {
    let app = TestApp::spawn().await;

    let (status, body) = app
        .as_bursar(
            "POST",
            "/payments",
            Some(json!({
                "student_id": STUDENT,
                "amount": "1000",
                "method": "MOBILE_MONEY",
                "operator": "mtn",
                "phone_number": "237670000000"
            })),
        )
        .await;

    assert_eq!(status, StatusCode::ACCEPTED, "{body}");
    let recorded = payment(body);
    assert!(matches!(
        recorded.status,
        PaymentStatus::Pending | PaymentStatus::Processing
    ));
    assert_eq!(recorded.amount, dec!(1025));
    assert_eq!(recorded.requested_amount, dec!(1000));
    assert_eq!(recorded.provider_reference.as_deref(), Some("mock-provider-ref"));

    let requests = app.gateway.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].amount, dec!(1025));
    assert_eq!(requests[0].reference, recorded.transaction_id);
}

#[tokio::test]
async fn gateway_rejection_marks_payment_failed() {
    let app = TestApp::spawn_with_gateway(MockGateway::rejecting("Insufficient balance")).await;

    let (status, body) = app
        .as_bursar(
            "POST",
            "/payments",
            Some(json!({
                "student_id": STUDENT,
                "amount": "1000",
                "method": "MOBILE_MONEY",
                "operator": "orange",
                "phone_number": "+237690000000"
            })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Insufficient balance"));

    let (_, list) = app
        .as_bursar("GET", &format!("/payments?student_id={STUDENT}"), None)
        .await;
    assert_eq!(list["total"], 1);
    assert_eq!(list["items"][0]["status"], "FAILED");
}

#[tokio::test]
async fn gateway_timeout_marks_payment_failed() {
    let settings = PaymentSettings {
        gateway_timeout: Duration::from_millis(50),
        ..PaymentSettings::default()
    };
    let gateway = MockGateway::accepting().with_delay(Duration::from_secs(5));
    let app = TestApp::spawn_with_settings(gateway, settings).await;

    let (status, body) = app
        .as_bursar(
            "POST",
            "/payments",
            Some(json!({
                "student_id": STUDENT,
                "amount": "1000",
                "method": "MOBILE_MONEY",
                "operator": "mtn",
                "phone_number": "237670000000"
            })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert!(body["error"].as_str().unwrap().contains("did not answer"));

    let (_, list) = app
        .as_bursar("GET", &format!("/payments?student_id={STUDENT}"), None)
        .await;
    assert_eq!(list["total"], 1);
    assert_eq!(list["items"][0]["status"], "FAILED");
    assert!(list["items"][0]["failure_reason"]
        .as_str()
        .unwrap()
        .contains("did not answer"));
}

#[tokio::test]
async fn mobile_money_requires_operator_and_phone() {
    let app = TestApp::spawn().await;

    let (status, _) = app
        .as_bursar(
            "POST",
            "/payments",
            Some(json!({ "student_id": STUDENT, "amount": "100", "method": "MOBILE_MONEY" })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.gateway.requests().is_empty());
}

#[tokio::test]
async fn non_positive_amount_is_rejected() {
    let app = TestApp::spawn().await;

    let (status, _) = app
        .as_bursar(
            "POST",
            "/payments",
            Some(json!({ "student_id": STUDENT, "amount": "0", "method": "CASH" })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn void_keeps_the_row_and_cannot_repeat() {
    let app = TestApp::spawn().await;
    let (_, body) = app
        .as_bursar(
            "POST",
            "/payments",
            Some(json!({ "student_id": STUDENT, "amount": "300", "method": "BANK_DEPOSIT" })),
        )
        .await;
    let id = payment(body).id;

    let uri = format!("/payments/{id}/void");
    let (status, body) = app
        .as_bursar("PUT", &uri, Some(json!({ "reason": "Entered twice" })))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let voided = payment(body);
    assert_eq!(voided.status, PaymentStatus::Cancelled);
    assert_eq!(voided.void_reason.as_deref(), Some("Entered twice"));
    assert!(voided.voided_at.is_some());

    let (status, _) = app
        .as_bursar("PUT", &uri, Some(json!({ "reason": "Again" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app.as_bursar("GET", &format!("/payments/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CANCELLED");
}

#[tokio::test]
async fn guardians_cannot_void() {
    let app = TestApp::spawn().await;
    let (_, body) = app
        .as_bursar(
            "POST",
            "/payments",
            Some(json!({ "student_id": STUDENT, "amount": "300", "method": "CASH" })),
        )
        .await;
    let id = payment(body).id;

    let (status, _) = app
        .call(
            "PUT",
            &format!("/payments/{id}/void"),
            GUARDIAN,
            "guardian",
            Some(json!({ "reason": "mine" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unlinked_guardian_is_forbidden() {
    let app = TestApp::spawn().await;

    let (status, _) = app
        .call(
            "POST",
            "/payments",
            "stranger",
            "guardian",
            Some(json!({ "student_id": STUDENT, "amount": "100", "method": "CASH" })),
        )
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn linked_guardian_may_pay_and_list() {
    let app = TestApp::spawn().await;

    let (status, _) = app
        .call(
            "POST",
            "/payments",
            GUARDIAN,
            "guardian",
            Some(json!({ "student_id": STUDENT, "amount": "100", "method": "CASH" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = app.call("GET", "/payments", GUARDIAN, "guardian", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .call(
            "GET",
            &format!("/payments?student_id={STUDENT}"),
            GUARDIAN,
            "guardian",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(decimal(&body["items"][0]["amount"]), dec!(100));
}

#[tokio::test]
async fn guardian_email_fallback_authorizes_payment() {
    let app = TestApp::spawn().await;
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/payments")
        .header("x-tenant-id", common::TENANT)
        .header("x-user-id", "another-login")
        .header("x-user-email", GUARDIAN_EMAIL.to_uppercase())
        .header("x-user-role", "parent")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(
            json!({ "student_id": STUDENT, "amount": "100", "method": "CASH" }).to_string(),
        ))
        .unwrap();

    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
}

#[tokio::test]
async fn missing_tenant_header_is_unauthorized() {
    let app = TestApp::spawn().await;
    let request = axum::http::Request::builder()
        .method("GET")
        .uri("/payments")
        .header("x-user-id", "someone")
        .body(axum::body::Body::empty())
        .unwrap();

    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn duplicate_transaction_id_conflicts() {
    let app = TestApp::spawn().await;
    let body = json!({
        "student_id": STUDENT,
        "amount": "100",
        "method": "CASH",
        "transaction_id": "RCPT-0001"
    });

    let (status, _) = app.as_bursar("POST", "/payments", Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = app.as_bursar("POST", "/payments", Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn offline_payments_cannot_use_gateway_prefixes() {
    let app = TestApp::spawn().await;

    for reserved in ["TXN-SHARED", "SUB-SHARED"] {
        let (status, body) = app
            .as_bursar(
                "POST",
                "/payments",
                Some(json!({
                    "student_id": STUDENT,
                    "amount": "100",
                    "method": "CASH",
                    "transaction_id": reserved
                })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    }

    let (_, list) = app
        .as_bursar("GET", &format!("/payments?student_id={STUDENT}"), None)
        .await;
    assert_eq!(list["total"], 0);
}

#[tokio::test]
async fn supplied_transaction_id_is_trimmed_before_checks() {
    let app = TestApp::spawn().await;

    let (status, body) = app
        .as_bursar(
            "POST",
            "/payments",
            Some(json!({
                "student_id": STUDENT,
                "amount": "100",
                "method": "MOBILE_MONEY",
                "operator": "mtn",
                "phone_number": "237670000000",
                "transaction_id": "  TXN-PADDED-1 "
            })),
        )
        .await;

    assert_eq!(status, StatusCode::ACCEPTED, "{body}");
    assert_eq!(payment(body).transaction_id, "TXN-PADDED-1");
    assert_eq!(app.gateway.requests()[0].reference, "TXN-PADDED-1");
}

#[tokio::test]
async fn gateway_references_are_unique_across_tenants() {
    let app = TestApp::spawn().await;
    let collection = |student: &str| {
        json!({
            "student_id": student,
            "amount": "100",
            "method": "MOBILE_MONEY",
            "operator": "mtn",
            "phone_number": "237670000000",
            "transaction_id": "TXN-SHARED"
        })
    };

    let (status, _) = app
        .call_in(
            OTHER_TENANT,
            "POST",
            "/payments",
            BURSAR,
            "bursar",
            Some(collection(OTHER_STUDENT)),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, _) = app
        .as_bursar("POST", "/payments", Some(collection(STUDENT)))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(app.gateway.requests().len(), 1);
}

#[tokio::test]
async fn offline_receipt_numbers_may_repeat_across_tenants() {
    let app = TestApp::spawn().await;
    let receipt = |student: &str| {
        json!({
            "student_id": student,
            "amount": "100",
            "method": "CASH",
            "transaction_id": "RCPT-0001"
        })
    };

    let (status, _) = app
        .call_in(
            OTHER_TENANT,
            "POST",
            "/payments",
            BURSAR,
            "bursar",
            Some(receipt(OTHER_STUDENT)),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = app.as_bursar("POST", "/payments", Some(receipt(STUDENT))).await;
    assert_eq!(status, StatusCode::CREATED);
}
