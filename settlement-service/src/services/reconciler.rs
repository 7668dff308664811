//! Webhook reconciler.
//!
//! Matches an at-least-once gateway callback to its ledger row, by reference
//! prefix, and applies the outcome idempotently. Every path ends in an
//! acknowledgement the provider can act on.

use axum::http::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use super::ledger::PaymentLedger;
use super::metrics;
use super::store::SettlementStore;
use super::subscription::SubscriptionBilling;
use crate::error::SettlementError;
use crate::models::{ReferenceError, ReferenceKind};

const DEFAULT_FAILURE_REASON: &str = "Payment declined by gateway";

/// Final result of a collection, in the ledger's vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
    Successful,
    Failed { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Completed,
    Failed,
    AlreadyProcessed,
    /// Interim provider status; nothing to apply yet.
    Ignored,
}

impl ReconcileOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ReconcileOutcome::Completed => "completed",
            ReconcileOutcome::Failed => "failed",
            ReconcileOutcome::AlreadyProcessed => "already_processed",
            ReconcileOutcome::Ignored => "ignored",
        }
    }

    /// Short body returned to the provider.
    pub fn acknowledgement(self) -> &'static str {
        match self {
            ReconcileOutcome::Completed | ReconcileOutcome::Failed => "Webhook processed",
            ReconcileOutcome::AlreadyProcessed => "Already processed",
            ReconcileOutcome::Ignored => "Status ignored",
        }
    }
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Missing reference")]
    MissingReference,

    #[error("Missing status")]
    MissingStatus,

    #[error("Unrecognized reference: {0}")]
    UnknownPrefix(String),

    #[error("Unknown reference: {0}")]
    UnknownReference(String),

    #[error("Internal error")]
    Internal(#[from] SettlementError),
}

impl WebhookError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::MissingReference
            | WebhookError::MissingStatus
            | WebhookError::UnknownPrefix(_) => StatusCode::BAD_REQUEST,
            WebhookError::UnknownReference(_) => StatusCode::NOT_FOUND,
            WebhookError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text body for the provider. Never echoes payload content.
    pub fn message(&self) -> &'static str {
        match self {
            WebhookError::MissingReference => "Missing reference",
            WebhookError::MissingStatus => "Missing status",
            WebhookError::UnknownPrefix(_) => "Unrecognized reference",
            WebhookError::UnknownReference(_) => "Transaction not found",
            WebhookError::Internal(_) => "Internal error",
        }
    }
}

impl From<ReferenceError> for WebhookError {
    fn from(err: ReferenceError) -> Self {
        match err {
            ReferenceError::Empty => WebhookError::MissingReference,
            ReferenceError::UnknownPrefix(r) => WebhookError::UnknownPrefix(r),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookStatus {
    Final(GatewayOutcome),
    Interim(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookNotification {
    pub reference: ReferenceKind,
    pub status: WebhookStatus,
}

fn field<'a>(envelopes: &[&'a Value], keys: &[&str]) -> Option<&'a str> {
    envelopes.iter().find_map(|env| {
        keys.iter()
            .find_map(|k| env.get(*k).and_then(Value::as_str))
            .filter(|v| !v.trim().is_empty())
    })
}

/// Read `{reference, status}` from either a nested `data` object or the top level.
pub fn parse_webhook(payload: &Value) -> Result<WebhookNotification, WebhookError> {
    let mut envelopes = Vec::with_capacity(2);
    if let Some(data) = payload.get("data").filter(|d| d.is_object()) {
        envelopes.push(data);
    }
    envelopes.push(payload);

    let reference = field(&envelopes, &["reference", "tx_ref", "txRef"])
        .ok_or(WebhookError::MissingReference)?;
    let reference = ReferenceKind::parse(reference)?;

    let status = field(&envelopes, &["status"]).ok_or(WebhookError::MissingStatus)?;
    let status = match status.trim().to_ascii_lowercase().as_str() {
        "successful" | "success" | "completed" => WebhookStatus::Final(GatewayOutcome::Successful),
        "failed" | "cancelled" | "declined" | "expired" => {
            let reason = field(&envelopes, &["processor_response", "reason", "message"])
                .unwrap_or(DEFAULT_FAILURE_REASON);
            WebhookStatus::Final(GatewayOutcome::Failed {
                reason: reason.to_string(),
            })
        }
        other => WebhookStatus::Interim(other.to_string()),
    };

    Ok(WebhookNotification { reference, status })
}

#[derive(Clone)]
pub struct WebhookReconciler {
    store: Arc<dyn SettlementStore>,
    ledger: PaymentLedger,
    subscriptions: SubscriptionBilling,
}

impl WebhookReconciler {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        ledger: PaymentLedger,
        subscriptions: SubscriptionBilling,
    ) -> Self {
        Self {
            store,
            ledger,
            subscriptions,
        }
    }

    pub async fn handle(&self, payload: &Value) -> Result<ReconcileOutcome, WebhookError> {
        let notification = match parse_webhook(payload) {
            Ok(n) => n,
            Err(e) => {
                metrics::record_webhook("unknown", "rejected");
                tracing::warn!(error = %e, "Rejected gateway webhook");
                return Err(e);
            }
        };

        let target = match &notification.reference {
            ReferenceKind::StudentPayment(_) => "student_payment",
            ReferenceKind::SubscriptionPayment(_) => "subscription",
        };
        let result = self.dispatch(&notification).await;

        match &result {
            Ok(outcome) => {
                metrics::record_webhook(target, outcome.as_str());
                tracing::info!(
                    reference = %notification.reference.as_str(),
                    target = target,
                    outcome = outcome.as_str(),
                    "Gateway webhook handled"
                );
            }
            Err(WebhookError::UnknownReference(reference)) => {
                metrics::record_webhook(target, "unknown_reference");
                tracing::error!(
                    reference = %reference,
                    target = target,
                    "Integrity fault: webhook references a transaction this ledger never recorded"
                );
            }
            Err(e) => {
                metrics::record_webhook(target, "error");
                tracing::error!(
                    reference = %notification.reference.as_str(),
                    error = ?e,
                    "Gateway webhook processing failed"
                );
            }
        }
        result
    }

    async fn dispatch(
        &self,
        notification: &WebhookNotification,
    ) -> Result<ReconcileOutcome, WebhookError> {
        let outcome = match &notification.status {
            WebhookStatus::Final(outcome) => outcome,
            WebhookStatus::Interim(status) => {
                tracing::debug!(status = %status, "Interim webhook status");
                return Ok(ReconcileOutcome::Ignored);
            }
        };

        match &notification.reference {
            ReferenceKind::StudentPayment(reference) => {
                let payment = self
                    .store
                    .find_gateway_payment(reference)
                    .await
                    .map_err(SettlementError::from)?
                    .ok_or_else(|| WebhookError::UnknownReference(reference.clone()))?;
                Ok(self.ledger.reconcile(&payment, outcome).await?)
            }
            ReferenceKind::SubscriptionPayment(reference) => {
                let payment = self
                    .store
                    .find_subscription_payment_by_reference(reference)
                    .await
                    .map_err(SettlementError::from)?
                    .ok_or_else(|| WebhookError::UnknownReference(reference.clone()))?;
                Ok(self.subscriptions.reconcile(&payment, outcome).await?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_nested_data_envelope() {
        let n = parse_webhook(&json!({
            "event": "charge.completed",
            "data": { "reference": "TXN-1-AB", "status": "successful" }
        }))
        .unwrap();
        assert_eq!(n.reference, ReferenceKind::StudentPayment("TXN-1-AB".into()));
        assert_eq!(n.status, WebhookStatus::Final(GatewayOutcome::Successful));
    }

    #[test]
    fn reads_top_level_envelope() {
        let n = parse_webhook(&json!({
            "reference": "SUB-9",
            "status": "failed",
            "processor_response": "Insufficient funds"
        }))
        .unwrap();
        assert_eq!(n.reference, ReferenceKind::SubscriptionPayment("SUB-9".into()));
        assert_eq!(
            n.status,
            WebhookStatus::Final(GatewayOutcome::Failed {
                reason: "Insufficient funds".into()
            })
        );
    }

    #[test]
    fn missing_reference_is_a_bad_request() {
        let err = parse_webhook(&json!({ "data": { "status": "successful" } })).unwrap_err();
        assert!(matches!(err, WebhookError::MissingReference));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn unknown_prefix_is_rejected() {
        let err = parse_webhook(&json!({ "reference": "ORD-1", "status": "successful" }))
            .unwrap_err();
        assert!(matches!(err, WebhookError::UnknownPrefix(_)));
    }

    #[test]
    fn interim_statuses_are_not_final() {
        let n = parse_webhook(&json!({ "data": { "reference": "TXN-2", "status": "pending" } }))
            .unwrap();
        assert_eq!(n.status, WebhookStatus::Interim("pending".into()));
    }

    #[test]
    fn failure_without_reason_gets_a_default() {
        let n = parse_webhook(&json!({ "data": { "reference": "TXN-3", "status": "FAILED" } }))
            .unwrap();
        assert_eq!(
            n.status,
            WebhookStatus::Final(GatewayOutcome::Failed {
                reason: DEFAULT_FAILURE_REASON.into()
            })
        );
    }
}
