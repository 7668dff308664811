//! Tenant subscription plans, billing cycles and the subscription ledger.

use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::payment::MobileOperator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionTier {
    Free,
    Basic,
    Standard,
    Premium,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TenantStatus {
    Trial,
    Active,
    Suspended,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingCycle {
    Monthly,
    Quarterly,
    Annually,
}

impl BillingCycle {
    /// Calendar months covered by one period.
    pub fn months(self) -> u32 {
        match self {
            BillingCycle::Monthly => 1,
            BillingCycle::Quarterly => 3,
            BillingCycle::Annually => 12,
        }
    }

    /// Months actually charged; annual billing gives two months free.
    pub fn billable_months(self) -> u32 {
        match self {
            BillingCycle::Annually => 10,
            other => other.months(),
        }
    }

    pub fn period_end(self, start: DateTime<Utc>) -> DateTime<Utc> {
        start
            .checked_add_months(Months::new(self.months()))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub id: String,
    pub tier: SubscriptionTier,
    pub name: String,
    pub monthly_price: Decimal,
    pub max_students: u32,
    pub max_staff: u32,
    pub storage_mb: u64,
    /// Monthly charge for each enrolled student above `max_students`.
    pub overage_per_student: Decimal,
}

/// Platform-side account state of a school.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantSubscription {
    pub tenant_id: String,
    pub tier: SubscriptionTier,
    pub status: TenantStatus,
    pub plan_id: Option<String>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub subscription_ends_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub max_students: u32,
    pub max_staff: u32,
    pub storage_mb: u64,
    pub student_count: u32,
    pub staff_count: u32,
    pub storage_used_mb: u64,
    pub updated_at: DateTime<Utc>,
}

impl TenantSubscription {
    /// Fresh tenant on the free trial.
    pub fn trial(tenant_id: impl Into<String>, trial_ends_at: DateTime<Utc>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            tier: SubscriptionTier::Free,
            status: TenantStatus::Trial,
            plan_id: None,
            trial_ends_at: Some(trial_ends_at),
            subscription_ends_at: None,
            cancelled_at: None,
            max_students: 50,
            max_staff: 5,
            storage_mb: 500,
            student_count: 0,
            staff_count: 0,
            storage_used_mb: 0,
            updated_at: Utc::now(),
        }
    }

    /// Apply a purchased plan for the given period.
    pub fn activate(&mut self, plan: &SubscriptionPlan, period_end: DateTime<Utc>, now: DateTime<Utc>) {
        self.tier = plan.tier;
        self.status = TenantStatus::Active;
        self.plan_id = Some(plan.id.clone());
        self.trial_ends_at = None;
        self.subscription_ends_at = Some(period_end);
        self.cancelled_at = None;
        self.max_students = plan.max_students;
        self.max_staff = plan.max_staff;
        self.storage_mb = plan.storage_mb;
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionPaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SubscriptionPaymentStatus {
    pub const SETTLEABLE: [SubscriptionPaymentStatus; 2] = [
        SubscriptionPaymentStatus::Pending,
        SubscriptionPaymentStatus::Processing,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SubscriptionPaymentStatus::Completed | SubscriptionPaymentStatus::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionPaymentStatus::Pending => "PENDING",
            SubscriptionPaymentStatus::Processing => "PROCESSING",
            SubscriptionPaymentStatus::Completed => "COMPLETED",
            SubscriptionPaymentStatus::Failed => "FAILED",
        }
    }
}

/// Ledger row for a tenant's charge from the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionPayment {
    pub id: String,
    pub tenant_id: String,
    pub plan_id: String,
    /// `SUB-` prefixed gateway reference.
    pub reference: String,
    pub billing_cycle: BillingCycle,
    pub base_amount: Decimal,
    pub overage_amount: Decimal,
    pub total_amount: Decimal,
    pub surcharge: Decimal,
    /// What the payer is asked for: `total_amount + surcharge`.
    pub charged_amount: Decimal,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub status: SubscriptionPaymentStatus,
    pub operator: Option<MobileOperator>,
    pub phone_number: Option<String>,
    pub provider_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub initiated_by: String,
    pub confirmed_by: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionTransition {
    Acknowledged {
        provider_reference: Option<String>,
        processing: bool,
    },
    Completed {
        at: DateTime<Utc>,
        confirmed_by: Option<String>,
    },
    Failed {
        reason: String,
    },
}

impl SubscriptionTransition {
    pub fn target_status(&self) -> SubscriptionPaymentStatus {
        match self {
            SubscriptionTransition::Acknowledged {
                processing: true, ..
            } => SubscriptionPaymentStatus::Processing,
            SubscriptionTransition::Acknowledged { .. } => SubscriptionPaymentStatus::Pending,
            SubscriptionTransition::Completed { .. } => SubscriptionPaymentStatus::Completed,
            SubscriptionTransition::Failed { .. } => SubscriptionPaymentStatus::Failed,
        }
    }

    pub fn apply(&self, payment: &mut SubscriptionPayment, now: DateTime<Utc>) {
        payment.status = self.target_status();
        payment.updated_at = now;
        match self {
            SubscriptionTransition::Acknowledged {
                provider_reference, ..
            } => {
                if provider_reference.is_some() {
                    payment.provider_reference = provider_reference.clone();
                }
            }
            SubscriptionTransition::Completed { at, confirmed_by } => {
                payment.completed_at = Some(*at);
                payment.confirmed_by = confirmed_by.clone();
            }
            SubscriptionTransition::Failed { reason } => {
                payment.failure_reason = Some(reason.clone());
            }
        }
    }
}
