//! Persistence port for the settlement engine.
//!
//! Every component receives an `Arc<dyn SettlementStore>`; production wires
//! MongoDB, tests and local runs wire the in-memory store.

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{
    FeeObligation, FeeTemplate, Payment, PaymentFilter, PaymentStatus, PaymentTransition,
    Scholarship, StudentRecord, SubscriptionPayment, SubscriptionPaymentStatus, SubscriptionPlan,
    SubscriptionTransition, TenantSubscription,
};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write.
    #[error("duplicate {0}")]
    Duplicate(String),

    #[error("storage failure: {0}")]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait SettlementStore: Send + Sync {
    // Fee catalog

    async fn insert_fee_template(&self, template: &FeeTemplate) -> StoreResult<()>;
    async fn get_fee_template(&self, tenant_id: &str, id: &str) -> StoreResult<Option<FeeTemplate>>;
    async fn list_fee_templates(&self, tenant_id: &str) -> StoreResult<Vec<FeeTemplate>>;
    async fn update_fee_template(&self, template: &FeeTemplate) -> StoreResult<bool>;
    async fn delete_fee_template(&self, tenant_id: &str, id: &str) -> StoreResult<bool>;
    async fn insert_scholarship(&self, scholarship: &Scholarship) -> StoreResult<()>;
    async fn get_scholarship(&self, tenant_id: &str, id: &str) -> StoreResult<Option<Scholarship>>;

    // Student directory (read-only)

    async fn get_student(&self, tenant_id: &str, student_id: &str)
    -> StoreResult<Option<StudentRecord>>;
    async fn list_active_students_in_class(
        &self,
        tenant_id: &str,
        class_id: &str,
    ) -> StoreResult<Vec<StudentRecord>>;

    // Obligations

    /// Fails with `StoreError::Duplicate` when the student already holds the template.
    async fn insert_obligation(&self, obligation: &FeeObligation) -> StoreResult<()>;
    async fn find_obligation(
        &self,
        student_id: &str,
        fee_template_id: &str,
    ) -> StoreResult<Option<FeeObligation>>;
    async fn list_student_obligations(
        &self,
        tenant_id: &str,
        student_id: &str,
    ) -> StoreResult<Vec<FeeObligation>>;
    async fn list_tenant_obligations(&self, tenant_id: &str) -> StoreResult<Vec<FeeObligation>>;
    async fn list_template_obligations(
        &self,
        tenant_id: &str,
        fee_template_id: &str,
    ) -> StoreResult<Vec<FeeObligation>>;
    /// Compare-and-set on `amount_paid`; `false` when another writer got there first.
    async fn apply_obligation_payment(
        &self,
        obligation_id: &str,
        expected_paid: Decimal,
        new_paid: Decimal,
    ) -> StoreResult<bool>;

    // Payment ledger

    /// Fails with `StoreError::Duplicate` on a reused `(tenant_id, transaction_id)`,
    /// or on a mobile-money `transaction_id` already used by any tenant.
    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()>;
    async fn get_payment(&self, tenant_id: &str, id: &str) -> StoreResult<Option<Payment>>;
    /// Webhook lookup: the mobile-money payment carrying `reference`, across tenants.
    async fn find_gateway_payment(&self, reference: &str) -> StoreResult<Option<Payment>>;
    /// Atomically apply `transition` only while the row's status is in
    /// `allowed_from`. Returns the updated row, or `None` if the guard failed.
    async fn transition_payment(
        &self,
        id: &str,
        allowed_from: &[PaymentStatus],
        transition: &PaymentTransition,
    ) -> StoreResult<Option<Payment>>;
    async fn list_payments(
        &self,
        tenant_id: &str,
        filter: &PaymentFilter,
    ) -> StoreResult<(Vec<Payment>, u64)>;
    async fn list_tenant_payments_with_status(
        &self,
        tenant_id: &str,
        status: PaymentStatus,
    ) -> StoreResult<Vec<Payment>>;

    // Subscription billing

    async fn get_plan(&self, plan_id: &str) -> StoreResult<Option<SubscriptionPlan>>;
    async fn list_plans(&self) -> StoreResult<Vec<SubscriptionPlan>>;
    async fn get_tenant_subscription(
        &self,
        tenant_id: &str,
    ) -> StoreResult<Option<TenantSubscription>>;
    async fn save_tenant_subscription(&self, subscription: &TenantSubscription) -> StoreResult<()>;
    async fn insert_subscription_payment(&self, payment: &SubscriptionPayment) -> StoreResult<()>;
    async fn get_subscription_payment(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> StoreResult<Option<SubscriptionPayment>>;
    async fn find_subscription_payment_by_reference(
        &self,
        reference: &str,
    ) -> StoreResult<Option<SubscriptionPayment>>;
    async fn transition_subscription_payment(
        &self,
        id: &str,
        allowed_from: &[SubscriptionPaymentStatus],
        transition: &SubscriptionTransition,
    ) -> StoreResult<Option<SubscriptionPayment>>;
    async fn list_subscription_payments(
        &self,
        tenant_id: &str,
        limit: u64,
        offset: u64,
    ) -> StoreResult<(Vec<SubscriptionPayment>, u64)>;

    async fn health_check(&self) -> StoreResult<()>;
}
