//! HTTP handlers for settlement-service.
//!
//! Handlers validate the request, resolve the tenant from headers and hand
//! off to the services; domain errors become `AppError` responses.

pub mod balances;
pub mod fees;
pub mod health;
pub mod payments;
pub mod subscriptions;
pub mod webhooks;

pub use health::{health_check, metrics_endpoint, readiness_check};
