//! Payment references shared with the collection gateway.
//!
//! The prefix of a reference decides which ledger a webhook settles.

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

pub const STUDENT_PAYMENT_PREFIX: &str = "TXN-";
pub const SUBSCRIPTION_PAYMENT_PREFIX: &str = "SUB-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceKind {
    StudentPayment(String),
    SubscriptionPayment(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("reference is empty")]
    Empty,
    #[error("unrecognized reference prefix: {0}")]
    UnknownPrefix(String),
}

impl ReferenceKind {
    pub fn parse(reference: &str) -> Result<Self, ReferenceError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ReferenceError::Empty);
        }
        if reference.starts_with(STUDENT_PAYMENT_PREFIX) {
            Ok(ReferenceKind::StudentPayment(reference.to_string()))
        } else if reference.starts_with(SUBSCRIPTION_PAYMENT_PREFIX) {
            Ok(ReferenceKind::SubscriptionPayment(reference.to_string()))
        } else {
            Err(ReferenceError::UnknownPrefix(reference.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ReferenceKind::StudentPayment(r) | ReferenceKind::SubscriptionPayment(r) => r,
        }
    }

    pub fn new_student_payment() -> String {
        generate(STUDENT_PAYMENT_PREFIX)
    }

    pub fn new_subscription_payment() -> String {
        generate(SUBSCRIPTION_PAYMENT_PREFIX)
    }
}

fn generate(prefix: &str) -> String {
    let nonce = Uuid::new_v4().simple().to_string();
    format!(
        "{prefix}{}-{}",
        Utc::now().timestamp_millis(),
        nonce[..8].to_ascii_uppercase()
    )
}
