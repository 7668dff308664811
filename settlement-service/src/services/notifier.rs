//! Out-of-band notifications for settled payments.
//!
//! Ledger code only hands events to a bounded queue. A background worker
//! rate-limits and retries delivery; its failures never reach the ledger.

use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use reqwest::header::HeaderMap;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::metrics;
use crate::config::NotificationSettings;
use crate::models::{PaymentMethod, SubscriptionTier};
use service_core::observability::inject_trace_context;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationEvent {
    PaymentReceipt {
        tenant_id: String,
        payment_id: String,
        student_id: String,
        transaction_id: String,
        amount: Decimal,
        method: PaymentMethod,
        recipient_email: Option<String>,
    },
    PaymentFailed {
        tenant_id: String,
        payment_id: String,
        student_id: String,
        transaction_id: String,
        reason: String,
        recipient_email: Option<String>,
    },
    SubscriptionActivated {
        tenant_id: String,
        tier: SubscriptionTier,
        period_end: DateTime<Utc>,
    },
}

impl NotificationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            NotificationEvent::PaymentReceipt { .. } => "payment_receipt",
            NotificationEvent::PaymentFailed { .. } => "payment_failed",
            NotificationEvent::SubscriptionActivated { .. } => "subscription_activated",
        }
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    /// The notification service refused the event; retrying will not help.
    #[error("notification rejected: {0}")]
    Rejected(String),

    #[error("notification delivery failed: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn deliver(&self, event: &NotificationEvent) -> Result<(), NotificationError>;
}

/// Posts events to the notification service.
pub struct HttpNotificationSender {
    client: Client,
    endpoint: String,
}

impl HttpNotificationSender {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: format!("{}/notifications/events", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl NotificationSender for HttpNotificationSender {
    async fn deliver(&self, event: &NotificationEvent) -> Result<(), NotificationError> {
        let mut headers = HeaderMap::new();
        inject_trace_context(&mut headers);

        let response = self
            .client
            .post(&self.endpoint)
            .headers(headers)
            .json(event)
            .send()
            .await
            .map_err(|e| NotificationError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_client_error() {
            Err(NotificationError::Rejected(status.to_string()))
        } else {
            Err(NotificationError::Unavailable(status.to_string()))
        }
    }
}

/// Logs events instead of delivering them; used when no notification
/// service is configured.
pub struct LogNotificationSender;

#[async_trait]
impl NotificationSender for LogNotificationSender {
    async fn deliver(&self, event: &NotificationEvent) -> Result<(), NotificationError> {
        tracing::info!(event = event.name(), payload = ?event, "Notification (log only)");
        Ok(())
    }
}

/// Records delivered events; can be told to fail the first N attempts.
#[derive(Default)]
pub struct MockNotificationSender {
    delivered: Mutex<Vec<NotificationEvent>>,
    failures_remaining: AtomicU32,
}

impl MockNotificationSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(attempts: u32) -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            failures_remaining: AtomicU32::new(attempts),
        }
    }

    pub fn delivered(&self) -> Vec<NotificationEvent> {
        self.delivered.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSender for MockNotificationSender {
    async fn deliver(&self, event: &NotificationEvent) -> Result<(), NotificationError> {
        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(NotificationError::Unavailable("[MOCK] transient failure".into()));
        }
        if let Ok(mut delivered) = self.delivered.lock() {
            delivered.push(event.clone());
        }
        Ok(())
    }
}

/// Handle to the notification worker. Cheap to clone.
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<NotificationEvent>,
}

impl NotificationQueue {
    /// Spawn the delivery worker on the current runtime.
    pub fn start(sender: Arc<dyn NotificationSender>, settings: &NotificationSettings) -> Self {
        let (tx, rx) = mpsc::channel(settings.queue_size.max(1));
        let rate = NonZeroU32::new(settings.rate_per_second).unwrap_or(NonZeroU32::MIN);
        let max_retry = settings.max_retry;
        tokio::spawn(run_worker(rx, sender, rate, max_retry));
        Self { tx }
    }

    /// Hand an event to the worker without waiting. A full or closed queue
    /// drops the event with a warning.
    pub fn enqueue(&self, event: NotificationEvent) {
        let name = event.name();
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                metrics::record_notification(name, "dropped");
                tracing::warn!(event = name, "Notification queue full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                metrics::record_notification(name, "dropped");
                tracing::warn!(event = name, "Notification worker stopped, dropping event");
            }
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<NotificationEvent>,
    sender: Arc<dyn NotificationSender>,
    rate: NonZeroU32,
    max_retry: Duration,
) {
    let limiter = RateLimiter::direct(Quota::per_second(rate));

    while let Some(event) = rx.recv().await {
        limiter.until_ready().await;

        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(100),
            max_elapsed_time: Some(max_retry),
            ..Default::default()
        };
        let result = retry(policy, || async {
            sender.deliver(&event).await.map_err(|e| match e {
                NotificationError::Rejected(_) => backoff::Error::permanent(e),
                NotificationError::Unavailable(_) => backoff::Error::transient(e),
            })
        })
        .await;

        match result {
            Ok(()) => {
                metrics::record_notification(event.name(), "delivered");
                tracing::debug!(event = event.name(), "Notification delivered");
            }
            Err(e) => {
                metrics::record_notification(event.name(), "failed");
                tracing::warn!(event = event.name(), error = %e, "Notification dropped after retries");
            }
        }
    }

    tracing::info!("Notification worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> NotificationSettings {
        NotificationSettings {
            queue_size: 8,
            rate_per_second: 100,
            max_retry: Duration::from_secs(5),
            ..Default::default()
        }
    }

    fn activated() -> NotificationEvent {
        NotificationEvent::SubscriptionActivated {
            tenant_id: "t1".into(),
            tier: SubscriptionTier::Basic,
            period_end: Utc::now(),
        }
    }

    async fn wait_for(sender: &MockNotificationSender, count: usize) -> Vec<NotificationEvent> {
        for _ in 0..100 {
            let delivered = sender.delivered();
            if delivered.len() >= count {
                return delivered;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        sender.delivered()
    }

    #[tokio::test]
    async fn delivers_enqueued_events() {
        let sender = Arc::new(MockNotificationSender::new());
        let queue = NotificationQueue::start(sender.clone(), &settings());

        queue.enqueue(activated());

        assert_eq!(wait_for(&sender, 1).await, vec![activated()]);
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let sender = Arc::new(MockNotificationSender::failing_first(2));
        let queue = NotificationQueue::start(sender.clone(), &settings());

        queue.enqueue(activated());

        assert_eq!(wait_for(&sender, 1).await.len(), 1);
    }

    #[test]
    fn events_serialize_with_a_tag() {
        let json = serde_json::to_value(activated()).unwrap();
        assert_eq!(json["event"], "subscription_activated");
        assert_eq!(json["tier"], "BASIC");
    }
}
