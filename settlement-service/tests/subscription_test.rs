mod common;

use axum::http::StatusCode;
use common::{decimal, TestApp, BASIC_PLAN, FREE_PLAN, TENANT};
use rust_decimal_macros::dec;
use serde_json::json;
use settlement_service::config::PaymentSettings;
use settlement_service::models::{SubscriptionTier, TenantStatus};
use settlement_service::services::store::SettlementStore;
use settlement_service::services::MockGateway;
use std::time::Duration;

#[tokio::test]
async fn upgrade_waits_for_admin_confirmation() {
    let app = TestApp::spawn().await;

    let (status, payment) = app
        .as_bursar(
            "POST",
            "/subscriptions/upgrade",
            Some(json!({ "plan_id": BASIC_PLAN, "billing_cycle": "ANNUALLY" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{payment}");
    assert_eq!(payment["status"], "PENDING");
    assert_eq!(decimal(&payment["total_amount"]), dec!(500000));
    let id = payment["id"].as_str().unwrap().to_string();

    let (_, sub) = app.as_bursar("GET", "/subscriptions", None).await;
    assert_eq!(sub["status"], "TRIAL");

    let uri = format!("/subscriptions/payments/{id}/confirm");
    let (status, _) = app.as_bursar("POST", &uri, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, confirmed) = app.as_admin("POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK, "{confirmed}");
    assert_eq!(confirmed["status"], "COMPLETED");
    assert_eq!(confirmed["confirmed_by"], common::ADMIN);

    let (status, _) = app.as_admin("POST", &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let tenant = app
        .store
        .get_tenant_subscription(TENANT)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tenant.status, TenantStatus::Active);
    assert_eq!(tenant.tier, SubscriptionTier::Basic);
    assert!(tenant.subscription_ends_at.is_some());
}

#[tokio::test]
async fn free_plan_activates_immediately() {
    let app = TestApp::spawn().await;

    let (status, payment) = app
        .as_admin(
            "POST",
            "/subscriptions/upgrade",
            Some(json!({ "plan_id": FREE_PLAN, "billing_cycle": "MONTHLY" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{payment}");
    assert_eq!(payment["status"], "COMPLETED");

    let (_, sub) = app.as_admin("GET", "/subscriptions", None).await;
    assert_eq!(sub["status"], "ACTIVE");
    assert_eq!(sub["tier"], "FREE");
}

#[tokio::test]
async fn rejected_subscription_collection_is_recorded_failed() {
    let app = TestApp::spawn_with_gateway(MockGateway::rejecting("Invalid MSISDN")).await;

    let (status, _) = app
        .as_admin(
            "POST",
            "/subscriptions/pay-mobile-money",
            Some(json!({
                "plan_id": BASIC_PLAN,
                "billing_cycle": "QUARTERLY",
                "phone_number": "237670000000",
                "operator": "mtn"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, page) = app.as_admin("GET", "/subscriptions/payments", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["status"], "FAILED");
    assert_eq!(decimal(&page["items"][0]["total_amount"]), dec!(150000));
}

#[tokio::test]
async fn slow_subscription_collection_is_recorded_failed() {
    let settings = PaymentSettings {
        gateway_timeout: Duration::from_millis(50),
        ..PaymentSettings::default()
    };
    let gateway = MockGateway::accepting().with_delay(Duration::from_secs(5));
    let app = TestApp::spawn_with_settings(gateway, settings).await;

    let (status, body) = app
        .as_admin(
            "POST",
            "/subscriptions/pay-mobile-money",
            Some(json!({
                "plan_id": BASIC_PLAN,
                "billing_cycle": "MONTHLY",
                "phone_number": "237670000000",
                "operator": "mtn"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (_, page) = app.as_admin("GET", "/subscriptions/payments", None).await;
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["status"], "FAILED");

    let tenant = app.store.get_tenant_subscription(TENANT).await.unwrap().unwrap();
    assert_eq!(tenant.tier, SubscriptionTier::Free);
}

#[tokio::test]
async fn cancel_is_admin_only_and_not_repeatable() {
    let app = TestApp::spawn().await;

    let (status, _) = app.as_bursar("POST", "/subscriptions/cancel", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, sub) = app.as_admin("POST", "/subscriptions/cancel", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sub["status"], "CANCELLED");
    assert!(!sub["cancelled_at"].is_null());

    let (status, _) = app.as_admin("POST", "/subscriptions/cancel", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn plans_are_listed() {
    let app = TestApp::spawn().await;
    let (status, plans) = app.as_bursar("GET", "/subscriptions/plans", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(plans.as_array().unwrap().len(), 2);
}
