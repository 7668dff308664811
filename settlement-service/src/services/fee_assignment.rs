//! Fee assignment engine: instantiates a template for a class cohort.
//!
//! Best-effort per student. One student's failure is recorded in the report
//! and never blocks the rest of the class.

use chrono::{NaiveDate, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::discount::DiscountResolver;
use super::metrics;
use super::require_staff;
use super::store::{SettlementStore, StoreError};
use crate::error::{SettlementError, SettlementResult};
use crate::models::{Actor, FeeObligation, FeeTemplate, StudentRecord};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AssignmentFailure {
    pub student_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct AssignmentReport {
    pub fee_template_id: String,
    pub class_id: String,
    pub assigned: u32,
    pub already_assigned: u32,
    pub failed: u32,
    pub errors: Vec<AssignmentFailure>,
}

#[derive(Debug)]
enum AssignmentOutcome {
    Assigned(FeeObligation),
    AlreadyAssigned,
}

impl AssignmentReport {
    fn record(&mut self, student_id: &str, outcome: Result<AssignmentOutcome, SettlementError>) {
        match outcome {
            Ok(AssignmentOutcome::Assigned(obligation)) => {
                tracing::debug!(
                    student_id = %student_id,
                    obligation_id = %obligation.id,
                    amount_due = %obligation.amount_due,
                    "Obligation created"
                );
                self.assigned += 1;
            }
            Ok(AssignmentOutcome::AlreadyAssigned) => self.already_assigned += 1,
            Err(e) => {
                self.failed += 1;
                self.errors.push(AssignmentFailure {
                    student_id: student_id.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
}

#[derive(Clone)]
pub struct FeeAssignmentEngine {
    store: Arc<dyn SettlementStore>,
    discounts: DiscountResolver,
}

impl FeeAssignmentEngine {
    pub fn new(store: Arc<dyn SettlementStore>, discounts: DiscountResolver) -> Self {
        Self { store, discounts }
    }

    pub async fn assign_fee_to_class(
        &self,
        tenant_id: &str,
        actor: &Actor,
        fee_template_id: &str,
        class_id: &str,
        due_date: Option<NaiveDate>,
    ) -> SettlementResult<AssignmentReport> {
        require_staff(actor)?;

        let template = self
            .store
            .get_fee_template(tenant_id, fee_template_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("fee template", fee_template_id))?;
        let students = self
            .store
            .list_active_students_in_class(tenant_id, class_id)
            .await?;

        let outcomes = join_all(
            students
                .iter()
                .map(|student| self.assign_one(&template, student, due_date)),
        )
        .await;

        let mut report = AssignmentReport {
            fee_template_id: fee_template_id.to_string(),
            class_id: class_id.to_string(),
            ..Default::default()
        };
        for (student, outcome) in students.iter().zip(outcomes) {
            if let Err(e) = &outcome {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    student_id = %student.id,
                    fee_template_id = %fee_template_id,
                    error = %e,
                    "Fee assignment failed for student"
                );
            }
            report.record(&student.id, outcome);
        }

        metrics::record_fee_assignment(tenant_id, "assigned", report.assigned.into());
        metrics::record_fee_assignment(tenant_id, "already_assigned", report.already_assigned.into());
        metrics::record_fee_assignment(tenant_id, "failed", report.failed.into());

        tracing::info!(
            tenant_id = %tenant_id,
            fee_template_id = %fee_template_id,
            class_id = %class_id,
            assigned = report.assigned,
            already_assigned = report.already_assigned,
            failed = report.failed,
            "Fee assigned to class"
        );
        Ok(report)
    }

    async fn assign_one(
        &self,
        template: &FeeTemplate,
        student: &StudentRecord,
        due_date: Option<NaiveDate>,
    ) -> Result<AssignmentOutcome, SettlementError> {
        if self
            .store
            .find_obligation(&student.id, &template.id)
            .await?
            .is_some()
        {
            return Ok(AssignmentOutcome::AlreadyAssigned);
        }

        let amount_due = self.discounts.amount_due(template, student).await?;
        let now = Utc::now();
        let obligation = FeeObligation {
            id: Uuid::new_v4().to_string(),
            tenant_id: template.tenant_id.clone(),
            student_id: student.id.clone(),
            fee_template_id: template.id.clone(),
            amount_due,
            amount_paid: rust_decimal::Decimal::ZERO,
            due_date,
            created_at: now,
            updated_at: now,
        };

        match self.store.insert_obligation(&obligation).await {
            Ok(()) => Ok(AssignmentOutcome::Assigned(obligation)),
            // a concurrent run created it between our lookup and insert
            Err(StoreError::Duplicate(_)) => Ok(AssignmentOutcome::AlreadyAssigned),
            Err(e) => Err(e.into()),
        }
    }
}
