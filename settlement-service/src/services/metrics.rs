use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use prometheus::{IntCounterVec, Opts, Registry};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
pub static PROMETHEUS_REGISTRY: OnceLock<Registry> = OnceLock::new();
pub static PAYMENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static WEBHOOKS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static FEE_ASSIGNMENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static NOTIFICATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

fn counter(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    IntCounterVec::new(Opts::new(name, help), labels)
        .unwrap_or_else(|e| panic!("Failed to create {name} metric: {e}"))
}

/// Install the Prometheus recorder and register settlement counters.
///
/// Safe to call more than once; only the first call has an effect.
pub fn init_metrics() {
    if METRICS_HANDLE.get().is_some() {
        return;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = METRICS_HANDLE.set(handle);
        }
        Err(e) => {
            tracing::warn!(error = %e, "Prometheus recorder already installed");
            return;
        }
    }

    let registry = Registry::new();

    let payments = counter(
        "settlement_payments_total",
        "Payment ledger transitions by tenant, method and resulting status",
        &["tenant_id", "method", "status"],
    );
    let webhooks = counter(
        "settlement_webhooks_total",
        "Gateway webhook deliveries by target ledger and outcome",
        &["target", "outcome"],
    );
    let assignments = counter(
        "settlement_fee_assignments_total",
        "Per-student fee assignment results by tenant",
        &["tenant_id", "outcome"],
    );
    let notifications = counter(
        "settlement_notifications_total",
        "Notification deliveries by event and result",
        &["event", "result"],
    );

    for c in [&payments, &webhooks, &assignments, &notifications] {
        registry
            .register(Box::new(c.clone()))
            .expect("Failed to register settlement metric");
    }

    let _ = PROMETHEUS_REGISTRY.set(registry);
    let _ = PAYMENTS_TOTAL.set(payments);
    let _ = WEBHOOKS_TOTAL.set(webhooks);
    let _ = FEE_ASSIGNMENTS_TOTAL.set(assignments);
    let _ = NOTIFICATIONS_TOTAL.set(notifications);
}

pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string());

    if let Some(registry) = PROMETHEUS_REGISTRY.get() {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).ok();
        if let Ok(custom_metrics) = String::from_utf8(buffer) {
            output.push_str(&custom_metrics);
        }
    }

    output
}

pub fn record_payment(tenant_id: &str, method: &str, status: &str) {
    if let Some(c) = PAYMENTS_TOTAL.get() {
        c.with_label_values(&[tenant_id, method, status]).inc();
    }
}

pub fn record_webhook(target: &str, outcome: &str) {
    if let Some(c) = WEBHOOKS_TOTAL.get() {
        c.with_label_values(&[target, outcome]).inc();
    }
}

pub fn record_fee_assignment(tenant_id: &str, outcome: &str, count: u64) {
    if let Some(c) = FEE_ASSIGNMENTS_TOTAL.get() {
        c.with_label_values(&[tenant_id, outcome]).inc_by(count);
    }
}

pub fn record_notification(event: &str, result: &str) {
    if let Some(c) = NOTIFICATIONS_TOTAL.get() {
        c.with_label_values(&[event, result]).inc();
    }
}
