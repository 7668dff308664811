//! Read-only balance views folded from obligations and completed payments.
//! Recomputed on every call; nothing is cached.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::ledger::PaymentLedger;
use super::require_staff;
use super::store::SettlementStore;
use crate::error::{SettlementError, SettlementResult};
use crate::models::{Actor, PaymentFilter, PaymentMethod, PaymentStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentBalance {
    pub student_id: String,
    pub total_due: Decimal,
    pub total_paid: Decimal,
    /// Negative when the student holds credit.
    pub balance: Decimal,
    pub obligations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinanceSummary {
    pub total_due: Decimal,
    pub total_collected: Decimal,
    pub outstanding: Decimal,
    pub overdue_students: usize,
    pub completed_payments: usize,
    pub collected_by_method: BTreeMap<PaymentMethod, Decimal>,
}

#[derive(Clone)]
pub struct BalanceAggregator {
    store: Arc<dyn SettlementStore>,
    ledger: PaymentLedger,
}

impl BalanceAggregator {
    pub fn new(store: Arc<dyn SettlementStore>, ledger: PaymentLedger) -> Self {
        Self { store, ledger }
    }

    pub async fn student_balance(
        &self,
        tenant_id: &str,
        actor: &Actor,
        student_id: &str,
    ) -> SettlementResult<StudentBalance> {
        let student = self
            .store
            .get_student(tenant_id, student_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("student", student_id))?;
        self.ledger.authorize_for_student(actor, &student)?;

        let obligations = self
            .store
            .list_student_obligations(tenant_id, student_id)
            .await?;
        let total_due: Decimal = obligations.iter().map(|o| o.amount_due).sum();

        let (completed, _) = self
            .store
            .list_payments(
                tenant_id,
                &PaymentFilter {
                    student_id: Some(student_id.to_string()),
                    status: Some(PaymentStatus::Completed),
                    ..Default::default()
                },
            )
            .await?;
        let total_paid: Decimal = completed.iter().map(|p| p.amount).sum();

        Ok(StudentBalance {
            student_id: student_id.to_string(),
            total_due,
            total_paid,
            balance: total_due - total_paid,
            obligations: obligations.len(),
        })
    }

    pub async fn tenant_summary(&self, tenant_id: &str, actor: &Actor) -> SettlementResult<FinanceSummary> {
        require_staff(actor)?;

        let obligations = self.store.list_tenant_obligations(tenant_id).await?;
        let completed = self
            .store
            .list_tenant_payments_with_status(tenant_id, PaymentStatus::Completed)
            .await?;

        let mut due_by_student: HashMap<&str, Decimal> = HashMap::new();
        for o in &obligations {
            *due_by_student.entry(o.student_id.as_str()).or_default() += o.amount_due;
        }
        let mut paid_by_student: HashMap<&str, Decimal> = HashMap::new();
        let mut collected_by_method = BTreeMap::new();
        for p in &completed {
            *paid_by_student.entry(p.student_id.as_str()).or_default() += p.amount;
            *collected_by_method.entry(p.method).or_insert(Decimal::ZERO) += p.amount;
        }

        let overdue_students = due_by_student
            .iter()
            .filter(|(student, due)| {
                **due > paid_by_student.get(*student).copied().unwrap_or_default()
            })
            .count();

        let total_due: Decimal = due_by_student.values().copied().sum();
        let total_collected: Decimal = paid_by_student.values().copied().sum();

        Ok(FinanceSummary {
            total_due,
            total_collected,
            outstanding: total_due - total_collected,
            overdue_students,
            completed_payments: completed.len(),
            collected_by_method,
        })
    }
}
