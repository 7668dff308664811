//! Payment ledger rows and their status state machine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    MobileMoney,
    BankDeposit,
}

impl PaymentMethod {
    /// Offline methods are confirmed at the moment they are recorded.
    pub fn settles_immediately(self) -> bool {
        !matches!(self, PaymentMethod::MobileMoney)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "CASH",
            PaymentMethod::MobileMoney => "MOBILE_MONEY",
            PaymentMethod::BankDeposit => "BANK_DEPOSIT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    /// States a gateway outcome may still move forward.
    pub const SETTLEABLE: [PaymentStatus; 2] = [PaymentStatus::Pending, PaymentStatus::Processing];

    /// States an explicit void may cancel.
    pub const VOIDABLE: [PaymentStatus; 4] = [
        PaymentStatus::Pending,
        PaymentStatus::Processing,
        PaymentStatus::Completed,
        PaymentStatus::Failed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed | PaymentStatus::Failed | PaymentStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        match (self, next) {
            (Pending, Pending) => true,
            (Pending | Processing, Processing | Completed | Failed) => true,
            (Pending | Processing | Completed | Failed, Cancelled) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MobileOperator {
    Mtn,
    Orange,
    Airtel,
    Vodafone,
    Tigo,
    Mpesa,
}

impl MobileOperator {
    /// Network code expected by the collection gateway.
    pub fn network_code(self) -> &'static str {
        match self {
            MobileOperator::Mtn => "MTN",
            MobileOperator::Orange => "ORANGE",
            MobileOperator::Airtel => "AIRTEL",
            MobileOperator::Vodafone => "VODAFONE",
            MobileOperator::Tigo => "TIGO",
            MobileOperator::Mpesa => "MPESA",
        }
    }
}

/// Ledger row for one student payment.
///
/// `amount` is the gross amount charged, including any mobile-money surcharge;
/// `requested_amount` is what the payer asked to put towards fees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub tenant_id: String,
    pub student_id: String,
    pub amount: Decimal,
    pub requested_amount: Decimal,
    pub surcharge: Decimal,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    /// Unique reference; `TXN-` prefixed for gateway collections.
    pub transaction_id: String,
    pub provider_reference: Option<String>,
    pub operator: Option<MobileOperator>,
    pub phone_number: Option<String>,
    pub notes: Option<String>,
    pub recorded_by: String,
    pub failure_reason: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub void_reason: Option<String>,
    pub voided_by: Option<String>,
    pub voided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A status change applied atomically by the store, guarded by the set of
/// states the row must currently be in.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentTransition {
    /// Gateway accepted the collection request.
    Acknowledged {
        provider_reference: Option<String>,
        processing: bool,
    },
    Completed {
        at: DateTime<Utc>,
    },
    Failed {
        reason: String,
    },
    Voided {
        reason: String,
        actor_id: String,
        at: DateTime<Utc>,
    },
}

impl PaymentTransition {
    pub fn target_status(&self) -> PaymentStatus {
        match self {
            PaymentTransition::Acknowledged { processing: true, .. } => PaymentStatus::Processing,
            PaymentTransition::Acknowledged { .. } => PaymentStatus::Pending,
            PaymentTransition::Completed { .. } => PaymentStatus::Completed,
            PaymentTransition::Failed { .. } => PaymentStatus::Failed,
            PaymentTransition::Voided { .. } => PaymentStatus::Cancelled,
        }
    }

    /// Mutate an in-memory row the same way the store's conditional update does.
    pub fn apply(&self, payment: &mut Payment, now: DateTime<Utc>) {
        payment.status = self.target_status();
        payment.updated_at = now;
        match self {
            PaymentTransition::Acknowledged {
                provider_reference, ..
            } => {
                if provider_reference.is_some() {
                    payment.provider_reference = provider_reference.clone();
                }
            }
            PaymentTransition::Completed { at } => payment.completed_at = Some(*at),
            PaymentTransition::Failed { reason } => payment.failure_reason = Some(reason.clone()),
            PaymentTransition::Voided {
                reason,
                actor_id,
                at,
            } => {
                payment.void_reason = Some(reason.clone());
                payment.voided_by = Some(actor_id.clone());
                payment.voided_at = Some(*at);
            }
        }
    }
}

/// Listing filter for the payment ledger.
#[derive(Debug, Clone, Default)]
pub struct PaymentFilter {
    pub student_id: Option<String>,
    pub status: Option<PaymentStatus>,
    pub method: Option<PaymentMethod>,
    pub limit: u64,
    pub offset: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_only_leave_through_void() {
        for status in [PaymentStatus::Completed, PaymentStatus::Failed] {
            assert!(status.can_transition_to(PaymentStatus::Cancelled));
            assert!(!status.can_transition_to(PaymentStatus::Processing));
            assert!(!status.can_transition_to(PaymentStatus::Completed));
        }
        assert!(!PaymentStatus::Cancelled.can_transition_to(PaymentStatus::Cancelled));
        assert!(!PaymentStatus::Failed.can_transition_to(PaymentStatus::Completed));
    }

    #[test]
    fn guarded_sets_agree_with_transition_table() {
        for from in PaymentStatus::SETTLEABLE {
            assert!(from.can_transition_to(PaymentStatus::Completed));
            assert!(from.can_transition_to(PaymentStatus::Failed));
        }
        for from in PaymentStatus::VOIDABLE {
            assert!(from.can_transition_to(PaymentStatus::Cancelled));
        }
    }

    #[test]
    fn acknowledgement_keeps_pending_unless_processing() {
        let pending = PaymentTransition::Acknowledged {
            provider_reference: None,
            processing: false,
        };
        let processing = PaymentTransition::Acknowledged {
            provider_reference: Some("flw-1".into()),
            processing: true,
        };
        assert_eq!(pending.target_status(), PaymentStatus::Pending);
        assert_eq!(processing.target_status(), PaymentStatus::Processing);
    }

    #[test]
    fn method_wire_names_are_screaming_snake_case() {
        let json = serde_json::to_string(&PaymentMethod::MobileMoney).unwrap();
        assert_eq!(json, "\"MOBILE_MONEY\"");
        let op: MobileOperator = serde_json::from_str("\"mpesa\"").unwrap();
        assert_eq!(op, MobileOperator::Mpesa);
    }
}
