//! In-process `SettlementStore` used by tests and local runs.
//!
//! All state sits behind one mutex, so each conditional transition is a
//! single check-and-write.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::store::{SettlementStore, StoreError, StoreResult};
use crate::models::{
    FeeObligation, FeeTemplate, Payment, PaymentFilter, PaymentMethod, PaymentStatus,
    PaymentTransition, Scholarship, StudentRecord, SubscriptionPayment, SubscriptionPaymentStatus,
    SubscriptionPlan, SubscriptionTransition, TenantSubscription,
};

#[derive(Default)]
struct State {
    templates: HashMap<String, FeeTemplate>,
    scholarships: HashMap<String, Scholarship>,
    students: HashMap<String, StudentRecord>,
    obligations: Vec<FeeObligation>,
    payments: Vec<Payment>,
    plans: HashMap<String, SubscriptionPlan>,
    tenants: HashMap<String, TenantSubscription>,
    subscription_payments: Vec<SubscriptionPayment>,
}

#[derive(Default)]
pub struct InMemorySettlementStore {
    state: Mutex<State>,
}

impl InMemorySettlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend(anyhow::anyhow!("in-memory store poisoned")))
    }

    pub fn add_student(&self, student: StudentRecord) {
        if let Ok(mut state) = self.lock() {
            state.students.insert(student.id.clone(), student);
        }
    }

    pub fn add_plan(&self, plan: SubscriptionPlan) {
        if let Ok(mut state) = self.lock() {
            state.plans.insert(plan.id.clone(), plan);
        }
    }

    pub fn add_tenant(&self, tenant: TenantSubscription) {
        if let Ok(mut state) = self.lock() {
            state.tenants.insert(tenant.tenant_id.clone(), tenant);
        }
    }

    /// Number of stored obligations for one student and template.
    pub fn obligation_count(&self, student_id: &str, fee_template_id: &str) -> usize {
        self.lock()
            .map(|state| {
                state
                    .obligations
                    .iter()
                    .filter(|o| o.student_id == student_id && o.fee_template_id == fee_template_id)
                    .count()
            })
            .unwrap_or(0)
    }
}

fn page<T: Clone>(rows: Vec<&T>, limit: u64, offset: u64) -> (Vec<T>, u64) {
    let total = rows.len() as u64;
    let items = rows
        .into_iter()
        .skip(offset as usize)
        .take(if limit == 0 { usize::MAX } else { limit as usize })
        .cloned()
        .collect();
    (items, total)
}

#[async_trait]
impl SettlementStore for InMemorySettlementStore {
    async fn insert_fee_template(&self, template: &FeeTemplate) -> StoreResult<()> {
        let mut state = self.lock()?;
        if state.templates.contains_key(&template.id) {
            return Err(StoreError::Duplicate("fee template".into()));
        }
        state.templates.insert(template.id.clone(), template.clone());
        Ok(())
    }

    async fn get_fee_template(&self, tenant_id: &str, id: &str) -> StoreResult<Option<FeeTemplate>> {
        Ok(self
            .lock()?
            .templates
            .get(id)
            .filter(|t| t.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_fee_templates(&self, tenant_id: &str) -> StoreResult<Vec<FeeTemplate>> {
        let state = self.lock()?;
        let mut templates: Vec<_> = state
            .templates
            .values()
            .filter(|t| t.tenant_id == tenant_id)
            .cloned()
            .collect();
        templates.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(templates)
    }

    async fn update_fee_template(&self, template: &FeeTemplate) -> StoreResult<bool> {
        let mut state = self.lock()?;
        match state.templates.get_mut(&template.id) {
            Some(existing) if existing.tenant_id == template.tenant_id => {
                *existing = template.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_fee_template(&self, tenant_id: &str, id: &str) -> StoreResult<bool> {
        let mut state = self.lock()?;
        let owned = state
            .templates
            .get(id)
            .is_some_and(|t| t.tenant_id == tenant_id);
        if owned {
            state.templates.remove(id);
        }
        Ok(owned)
    }

    async fn insert_scholarship(&self, scholarship: &Scholarship) -> StoreResult<()> {
        self.lock()?
            .scholarships
            .insert(scholarship.id.clone(), scholarship.clone());
        Ok(())
    }

    async fn get_scholarship(&self, tenant_id: &str, id: &str) -> StoreResult<Option<Scholarship>> {
        Ok(self
            .lock()?
            .scholarships
            .get(id)
            .filter(|s| s.tenant_id == tenant_id)
            .cloned())
    }

    async fn get_student(
        &self,
        tenant_id: &str,
        student_id: &str,
    ) -> StoreResult<Option<StudentRecord>> {
        Ok(self
            .lock()?
            .students
            .get(student_id)
            .filter(|s| s.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_active_students_in_class(
        &self,
        tenant_id: &str,
        class_id: &str,
    ) -> StoreResult<Vec<StudentRecord>> {
        let state = self.lock()?;
        let mut students: Vec<_> = state
            .students
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.class_id == class_id && s.active)
            .cloned()
            .collect();
        students.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(students)
    }

    async fn insert_obligation(&self, obligation: &FeeObligation) -> StoreResult<()> {
        let mut state = self.lock()?;
        let exists = state.obligations.iter().any(|o| {
            o.student_id == obligation.student_id
                && o.fee_template_id == obligation.fee_template_id
        });
        if exists {
            return Err(StoreError::Duplicate("fee obligation".into()));
        }
        state.obligations.push(obligation.clone());
        Ok(())
    }

    async fn find_obligation(
        &self,
        student_id: &str,
        fee_template_id: &str,
    ) -> StoreResult<Option<FeeObligation>> {
        Ok(self
            .lock()?
            .obligations
            .iter()
            .find(|o| o.student_id == student_id && o.fee_template_id == fee_template_id)
            .cloned())
    }

    async fn list_student_obligations(
        &self,
        tenant_id: &str,
        student_id: &str,
    ) -> StoreResult<Vec<FeeObligation>> {
        Ok(self
            .lock()?
            .obligations
            .iter()
            .filter(|o| o.tenant_id == tenant_id && o.student_id == student_id)
            .cloned()
            .collect())
    }

    async fn list_tenant_obligations(&self, tenant_id: &str) -> StoreResult<Vec<FeeObligation>> {
        Ok(self
            .lock()?
            .obligations
            .iter()
            .filter(|o| o.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn list_template_obligations(
        &self,
        tenant_id: &str,
        fee_template_id: &str,
    ) -> StoreResult<Vec<FeeObligation>> {
        Ok(self
            .lock()?
            .obligations
            .iter()
            .filter(|o| o.tenant_id == tenant_id && o.fee_template_id == fee_template_id)
            .cloned()
            .collect())
    }

    async fn apply_obligation_payment(
        &self,
        obligation_id: &str,
        expected_paid: Decimal,
        new_paid: Decimal,
    ) -> StoreResult<bool> {
        let mut state = self.lock()?;
        match state
            .obligations
            .iter_mut()
            .find(|o| o.id == obligation_id && o.amount_paid == expected_paid)
        {
            Some(obligation) => {
                obligation.amount_paid = new_paid;
                obligation.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()> {
        let mut state = self.lock()?;
        let gateway = payment.method == PaymentMethod::MobileMoney;
        let exists = state.payments.iter().any(|p| {
            p.transaction_id == payment.transaction_id
                && (p.tenant_id == payment.tenant_id
                    || (gateway && p.method == PaymentMethod::MobileMoney))
        });
        if exists {
            return Err(StoreError::Duplicate("transaction id".into()));
        }
        state.payments.push(payment.clone());
        Ok(())
    }

    async fn get_payment(&self, tenant_id: &str, id: &str) -> StoreResult<Option<Payment>> {
        Ok(self
            .lock()?
            .payments
            .iter()
            .find(|p| p.id == id && p.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_gateway_payment(&self, reference: &str) -> StoreResult<Option<Payment>> {
        Ok(self
            .lock()?
            .payments
            .iter()
            .find(|p| p.method == PaymentMethod::MobileMoney && p.transaction_id == reference)
            .cloned())
    }

    async fn transition_payment(
        &self,
        id: &str,
        allowed_from: &[PaymentStatus],
        transition: &PaymentTransition,
    ) -> StoreResult<Option<Payment>> {
        let mut state = self.lock()?;
        let Some(payment) = state
            .payments
            .iter_mut()
            .find(|p| p.id == id && allowed_from.contains(&p.status))
        else {
            return Ok(None);
        };
        transition.apply(payment, Utc::now());
        Ok(Some(payment.clone()))
    }

    async fn list_payments(
        &self,
        tenant_id: &str,
        filter: &PaymentFilter,
    ) -> StoreResult<(Vec<Payment>, u64)> {
        let state = self.lock()?;
        let mut rows: Vec<&Payment> = state
            .payments
            .iter()
            .filter(|p| p.tenant_id == tenant_id)
            .filter(|p| filter.student_id.as_deref().is_none_or(|s| p.student_id == s))
            .filter(|p| filter.status.is_none_or(|s| p.status == s))
            .filter(|p| filter.method.is_none_or(|m| p.method == m))
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(rows, filter.limit, filter.offset))
    }

    async fn list_tenant_payments_with_status(
        &self,
        tenant_id: &str,
        status: PaymentStatus,
    ) -> StoreResult<Vec<Payment>> {
        Ok(self
            .lock()?
            .payments
            .iter()
            .filter(|p| p.tenant_id == tenant_id && p.status == status)
            .cloned()
            .collect())
    }

    async fn get_plan(&self, plan_id: &str) -> StoreResult<Option<SubscriptionPlan>> {
        Ok(self.lock()?.plans.get(plan_id).cloned())
    }

    async fn list_plans(&self) -> StoreResult<Vec<SubscriptionPlan>> {
        let mut plans: Vec<_> = self.lock()?.plans.values().cloned().collect();
        plans.sort_by(|a, b| a.monthly_price.cmp(&b.monthly_price));
        Ok(plans)
    }

    async fn get_tenant_subscription(
        &self,
        tenant_id: &str,
    ) -> StoreResult<Option<TenantSubscription>> {
        Ok(self.lock()?.tenants.get(tenant_id).cloned())
    }

    async fn save_tenant_subscription(&self, subscription: &TenantSubscription) -> StoreResult<()> {
        self.lock()?
            .tenants
            .insert(subscription.tenant_id.clone(), subscription.clone());
        Ok(())
    }

    async fn insert_subscription_payment(&self, payment: &SubscriptionPayment) -> StoreResult<()> {
        let mut state = self.lock()?;
        if state
            .subscription_payments
            .iter()
            .any(|p| p.reference == payment.reference)
        {
            return Err(StoreError::Duplicate("subscription reference".into()));
        }
        state.subscription_payments.push(payment.clone());
        Ok(())
    }

    async fn get_subscription_payment(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> StoreResult<Option<SubscriptionPayment>> {
        Ok(self
            .lock()?
            .subscription_payments
            .iter()
            .find(|p| p.id == id && p.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_subscription_payment_by_reference(
        &self,
        reference: &str,
    ) -> StoreResult<Option<SubscriptionPayment>> {
        Ok(self
            .lock()?
            .subscription_payments
            .iter()
            .find(|p| p.reference == reference)
            .cloned())
    }

    async fn transition_subscription_payment(
        &self,
        id: &str,
        allowed_from: &[SubscriptionPaymentStatus],
        transition: &SubscriptionTransition,
    ) -> StoreResult<Option<SubscriptionPayment>> {
        let mut state = self.lock()?;
        let Some(payment) = state
            .subscription_payments
            .iter_mut()
            .find(|p| p.id == id && allowed_from.contains(&p.status))
        else {
            return Ok(None);
        };
        transition.apply(payment, Utc::now());
        Ok(Some(payment.clone()))
    }

    async fn list_subscription_payments(
        &self,
        tenant_id: &str,
        limit: u64,
        offset: u64,
    ) -> StoreResult<(Vec<SubscriptionPayment>, u64)> {
        let state = self.lock()?;
        let mut rows: Vec<&SubscriptionPayment> = state
            .subscription_payments
            .iter()
            .filter(|p| p.tenant_id == tenant_id)
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(rows, limit, offset))
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.lock().map(|_| ())
    }
}
