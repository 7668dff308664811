#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::Secret;
use serde_json::Value;
use settlement_service::{
    build_router,
    config::{NotificationSettings, PaymentSettings},
    models::{StudentRecord, SubscriptionPlan, SubscriptionTier, TenantSubscription},
    services::{
        notifier::MockNotificationSender, InMemorySettlementStore, MockGateway,
        NotificationQueue,
    },
    AppState,
};
use std::sync::Arc;
use tower::util::ServiceExt;

pub const TENANT: &str = "school-1";
pub const OTHER_TENANT: &str = "school-2";
pub const OTHER_STUDENT: &str = "student-b1";
pub const ADMIN: &str = "admin-1";
pub const BURSAR: &str = "bursar-1";
pub const GUARDIAN: &str = "guardian-1";
pub const GUARDIAN_EMAIL: &str = "parent@example.com";
pub const STUDENT: &str = "student-1";
pub const CLASS: &str = "class-5a";
pub const BASIC_PLAN: &str = "plan-basic";
pub const FREE_PLAN: &str = "plan-free";
pub const WEBHOOK_SECRET: &str = "whsec_test";

pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemorySettlementStore>,
    pub gateway: Arc<MockGateway>,
    pub notifier: Arc<MockNotificationSender>,
}

pub fn student(id: &str, class_id: &str) -> StudentRecord {
    student_in(TENANT, id, class_id)
}

pub fn student_in(tenant_id: &str, id: &str, class_id: &str) -> StudentRecord {
    StudentRecord {
        id: id.to_string(),
        tenant_id: tenant_id.to_string(),
        class_id: class_id.to_string(),
        full_name: format!("Student {id}"),
        active: true,
        scholarship_id: None,
        guardian_ids: vec![GUARDIAN.to_string()],
        guardian_email: Some(GUARDIAN_EMAIL.to_string()),
    }
}

fn plan(id: &str, tier: SubscriptionTier, monthly_price: Decimal) -> SubscriptionPlan {
    SubscriptionPlan {
        id: id.to_string(),
        tier,
        name: format!("{tier:?}"),
        monthly_price,
        max_students: 200,
        max_staff: 20,
        storage_mb: 5_000,
        overage_per_student: dec!(1),
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(MockGateway::accepting(), PaymentSettings::default(), None).await
    }

    pub async fn spawn_with_gateway(gateway: MockGateway) -> Self {
        Self::spawn_with(gateway, PaymentSettings::default(), None).await
    }

    pub async fn spawn_with_settings(gateway: MockGateway, settings: PaymentSettings) -> Self {
        Self::spawn_with(gateway, settings, None).await
    }

    pub async fn spawn_with_webhook_secret() -> Self {
        Self::spawn_with(
            MockGateway::accepting(),
            PaymentSettings::default(),
            Some(WEBHOOK_SECRET),
        )
        .await
    }

    async fn spawn_with(
        gateway: MockGateway,
        settings: PaymentSettings,
        webhook_secret: Option<&str>,
    ) -> Self {
        let store = Arc::new(InMemorySettlementStore::new());
        store.add_student(student(STUDENT, CLASS));
        store.add_student(student_in(OTHER_TENANT, OTHER_STUDENT, CLASS));
        store.add_plan(plan(FREE_PLAN, SubscriptionTier::Free, Decimal::ZERO));
        store.add_plan(plan(BASIC_PLAN, SubscriptionTier::Basic, dec!(50000)));
        store.add_tenant(TenantSubscription::trial(
            TENANT,
            Utc::now() + Duration::days(30),
        ));

        let gateway = Arc::new(gateway);
        let notifier = Arc::new(MockNotificationSender::new());
        let notifications = NotificationQueue::start(
            notifier.clone(),
            &NotificationSettings {
                rate_per_second: 1_000,
                ..Default::default()
            },
        );

        let state = AppState::new(
            store.clone(),
            gateway.clone(),
            notifications,
            settings,
            webhook_secret.map(|s| Secret::new(s.to_string())),
            10_000,
        );

        Self {
            router: build_router(state),
            store,
            gateway,
            notifier,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, body)
    }

    pub async fn call(
        &self,
        method: &str,
        uri: &str,
        user: &str,
        role: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        self.call_in(TENANT, method, uri, user, role, body).await
    }

    pub async fn call_in(
        &self,
        tenant_id: &str,
        method: &str,
        uri: &str,
        user: &str,
        role: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-tenant-id", tenant_id)
            .header("x-user-id", user)
            .header("x-user-role", role)
            .header("content-type", "application/json");
        let request = match body {
            Some(json) => builder.body(Body::from(json.to_string())).unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    pub async fn as_bursar(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.call(method, uri, BURSAR, "bursar", body).await
    }

    pub async fn as_admin(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.call(method, uri, ADMIN, "admin", body).await
    }

    pub async fn webhook(&self, payload: Value) -> (StatusCode, String) {
        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/gateway")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap();
        let (status, body) = self.send(request).await;
        (status, body.as_str().unwrap_or_default().to_string())
    }

    /// Create a fee template and assign it to the default class.
    pub async fn assign_fee(&self, amount: Decimal) -> String {
        let (status, template) = self
            .as_bursar(
                "POST",
                "/fees/templates",
                Some(serde_json::json!({
                    "name": "Tuition",
                    "amount": amount,
                    "applicable_grade": "5",
                    "billing_period_id": "term-1"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{template}");
        let template_id = template["id"].as_str().unwrap().to_string();

        let (status, report) = self
            .as_bursar(
                "POST",
                "/fees/assign-class",
                Some(serde_json::json!({
                    "fee_template_id": template_id,
                    "class_id": CLASS
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{report}");
        template_id
    }

    pub async fn balance(&self, student_id: &str) -> Decimal {
        let (status, body) = self
            .as_bursar("GET", &format!("/students/{student_id}/balance"), None)
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        decimal(&body["balance"])
    }

    /// Poll until the notification worker has delivered `count` events.
    pub async fn wait_for_notifications(&self, count: usize) {
        for _ in 0..100 {
            if self.notifier.delivered().len() >= count {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!(
            "expected {count} notifications, got {}",
            self.notifier.delivered().len()
        );
    }
}

pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().unwrap(),
        other => other.to_string().parse().unwrap(),
    }
}
