pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::{
    routing::{get, post, put},
    Router,
};
use secrecy::Secret;
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use config::PaymentSettings;
use services::{
    BalanceAggregator, CollectionGateway, DiscountResolver, FeeAssignmentEngine, FeeCatalog,
    NotificationQueue, PaymentLedger, SettlementStore, SubscriptionBilling, WebhookReconciler,
};

/// Shared application state. Every service shares one store handle.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SettlementStore>,
    pub fees: FeeCatalog,
    pub assignments: FeeAssignmentEngine,
    pub ledger: PaymentLedger,
    pub reconciler: WebhookReconciler,
    pub subscriptions: SubscriptionBilling,
    pub balances: BalanceAggregator,
    pub webhook_secret: Option<Secret<String>>,
    pub rate_limiter: IpRateLimiter,
}

impl AppState {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        gateway: Arc<dyn CollectionGateway>,
        notifications: NotificationQueue,
        settings: PaymentSettings,
        webhook_secret: Option<Secret<String>>,
        rate_limit_per_minute: u32,
    ) -> Self {
        let ledger = PaymentLedger::new(
            store.clone(),
            gateway.clone(),
            notifications.clone(),
            settings.clone(),
        );
        let subscriptions =
            SubscriptionBilling::new(store.clone(), gateway, notifications, settings);
        Self {
            fees: FeeCatalog::new(store.clone()),
            assignments: FeeAssignmentEngine::new(
                store.clone(),
                DiscountResolver::new(store.clone()),
            ),
            reconciler: WebhookReconciler::new(
                store.clone(),
                ledger.clone(),
                subscriptions.clone(),
            ),
            balances: BalanceAggregator::new(store.clone(), ledger.clone()),
            ledger,
            subscriptions,
            store,
            webhook_secret,
            rate_limiter: create_ip_rate_limiter(rate_limit_per_minute, 60),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let fees = Router::new()
        .route(
            "/templates",
            post(handlers::fees::create_fee_template).get(handlers::fees::list_fee_templates),
        )
        .route(
            "/templates/:id",
            get(handlers::fees::get_fee_template)
                .put(handlers::fees::update_fee_template)
                .delete(handlers::fees::delete_fee_template),
        )
        .route("/scholarships", post(handlers::fees::create_scholarship))
        .route("/assign-class", post(handlers::fees::assign_fee_to_class));

    let payments = Router::new()
        .route(
            "/",
            post(handlers::payments::create_payment).get(handlers::payments::list_payments),
        )
        .route("/:id", get(handlers::payments::get_payment))
        .route("/:id/void", put(handlers::payments::void_payment));

    let subscriptions = Router::new()
        .route("/", get(handlers::subscriptions::get_subscription))
        .route("/plans", get(handlers::subscriptions::list_plans))
        .route("/upgrade", post(handlers::subscriptions::initiate_upgrade))
        .route(
            "/pay-mobile-money",
            post(handlers::subscriptions::pay_with_mobile_money),
        )
        .route(
            "/payments",
            get(handlers::subscriptions::list_subscription_payments),
        )
        .route(
            "/payments/:id/confirm",
            post(handlers::subscriptions::confirm_payment),
        )
        .route("/cancel", post(handlers::subscriptions::cancel_subscription));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .nest("/fees", fees)
        .nest("/payments", payments)
        .nest("/subscriptions", subscriptions)
        .route(
            "/students/:id/balance",
            get(handlers::balances::student_balance),
        )
        .route("/finance/summary", get(handlers::balances::finance_summary))
        .route("/webhooks/gateway", post(handlers::webhooks::gateway_webhook))
        .layer(from_fn_with_state(
            state.rate_limiter.clone(),
            ip_rate_limit_middleware,
        ))
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    tenant_id = tracing::field::Empty,
                    user_id = tracing::field::Empty,
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .with_state(state)
}
