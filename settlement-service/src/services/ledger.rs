//! Payment ledger: records payment intents and drives their status.
//!
//! Offline methods complete on creation. Mobile money starts PENDING, calls
//! the gateway synchronously, and is finalized later by the webhook
//! reconciler; a failed initiation is marked FAILED on the spot.

use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use uuid::Uuid;

use super::gateway::{CollectionGateway, CollectionRequest, GatewayError};
use super::metrics;
use super::notifier::{NotificationEvent, NotificationQueue};
use super::reconciler::{GatewayOutcome, ReconcileOutcome};
use super::require_staff;
use super::store::{SettlementStore, StoreError};
use crate::config::PaymentSettings;
use crate::error::{SettlementError, SettlementResult};
use crate::models::reference::{STUDENT_PAYMENT_PREFIX, SUBSCRIPTION_PAYMENT_PREFIX};
use crate::models::{
    Actor, FeeObligation, MobileOperator, Payment, PaymentFilter, PaymentMethod, PaymentStatus,
    PaymentTransition, ReferenceKind, StudentRecord,
};

/// Attempts to advance one obligation before giving up on a contended row.
const ALLOCATION_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub student_id: String,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub notes: Option<String>,
    pub operator: Option<MobileOperator>,
    pub phone_number: Option<String>,
    pub transaction_id: Option<String>,
}

#[derive(Clone)]
pub struct PaymentLedger {
    store: Arc<dyn SettlementStore>,
    gateway: Arc<dyn CollectionGateway>,
    notifications: NotificationQueue,
    settings: PaymentSettings,
}

/// Gross amount for a mobile-money collection: `amount × (1 + pct/100)`.
pub fn with_surcharge(amount: Decimal, percent: Decimal) -> Decimal {
    (amount * (Decimal::ONE + percent / Decimal::ONE_HUNDRED))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .normalize()
}

pub(crate) fn valid_phone(phone: &str) -> bool {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    (8..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

impl PaymentLedger {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        gateway: Arc<dyn CollectionGateway>,
        notifications: NotificationQueue,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            notifications,
            settings,
        }
    }

    pub fn settings(&self) -> &PaymentSettings {
        &self.settings
    }

    /// Guardians may act for a student they are linked to, or whose
    /// registered guardian e-mail matches theirs when the fallback is on.
    pub fn authorize_for_student(&self, actor: &Actor, student: &StudentRecord) -> SettlementResult<()> {
        if actor.is_staff() || student.guardian_ids.iter().any(|g| g == &actor.user_id) {
            return Ok(());
        }
        if self.settings.guardian_email_fallback {
            if let (Some(mine), Some(registered)) = (&actor.email, &student.guardian_email) {
                if mine.trim().eq_ignore_ascii_case(registered.trim()) {
                    return Ok(());
                }
            }
        }
        Err(SettlementError::Unauthorized(
            "not authorized to act for this student".into(),
        ))
    }

    async fn student(&self, tenant_id: &str, student_id: &str) -> SettlementResult<StudentRecord> {
        self.store
            .get_student(tenant_id, student_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("student", student_id))
    }

    pub async fn create_payment(
        &self,
        tenant_id: &str,
        actor: &Actor,
        input: CreatePayment,
    ) -> SettlementResult<Payment> {
        if input.amount <= Decimal::ZERO {
            return Err(SettlementError::Validation(
                "amount must be greater than zero".into(),
            ));
        }

        let supplied_id = input
            .transaction_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());

        let collection = if input.method == PaymentMethod::MobileMoney {
            let operator = input.operator.ok_or_else(|| {
                SettlementError::Validation("operator is required for mobile money".into())
            })?;
            let phone = input
                .phone_number
                .as_deref()
                .map(str::trim)
                .filter(|p| valid_phone(p))
                .ok_or_else(|| {
                    SettlementError::Validation(
                        "a valid phone number is required for mobile money".into(),
                    )
                })?;
            if let Some(id) = supplied_id {
                if !id.starts_with(STUDENT_PAYMENT_PREFIX) {
                    return Err(SettlementError::Validation(format!(
                        "mobile money transaction ids must start with {STUDENT_PAYMENT_PREFIX}"
                    )));
                }
            }
            Some((operator, phone.to_string()))
        } else {
            // gateway prefixes route webhooks and are reserved for collections
            if let Some(id) = supplied_id.filter(|id| is_gateway_reference(id)) {
                return Err(SettlementError::Validation(format!(
                    "transaction id {id} uses a prefix reserved for gateway collections"
                )));
            }
            None
        };

        let student = self.student(tenant_id, &input.student_id).await?;
        self.authorize_for_student(actor, &student)?;

        let transaction_id = match supplied_id {
            Some(id) => id.to_string(),
            None => ReferenceKind::new_student_payment(),
        };
        let amount = if collection.is_some() {
            with_surcharge(input.amount, self.settings.mobile_money_surcharge_percent)
        } else {
            input.amount
        };

        let now = Utc::now();
        let settled = input.method.settles_immediately();
        let payment = Payment {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            student_id: student.id.clone(),
            amount,
            requested_amount: input.amount,
            surcharge: amount - input.amount,
            method: input.method,
            status: if settled {
                PaymentStatus::Completed
            } else {
                PaymentStatus::Pending
            },
            transaction_id,
            provider_reference: None,
            operator: collection.as_ref().map(|(op, _)| *op),
            phone_number: collection.as_ref().map(|(_, phone)| phone.clone()),
            notes: input.notes,
            recorded_by: actor.user_id.clone(),
            failure_reason: None,
            completed_at: settled.then_some(now),
            void_reason: None,
            voided_by: None,
            voided_at: None,
            created_at: now,
            updated_at: now,
        };

        self.store.insert_payment(&payment).await.map_err(|e| match e {
            StoreError::Duplicate(_) => SettlementError::Conflict(format!(
                "transaction id {} is already recorded",
                payment.transaction_id
            )),
            other => other.into(),
        })?;

        tracing::info!(
            tenant_id = %tenant_id,
            payment_id = %payment.id,
            student_id = %payment.student_id,
            transaction_id = %payment.transaction_id,
            method = payment.method.as_str(),
            amount = %payment.amount,
            status = payment.status.as_str(),
            "Payment recorded"
        );
        metrics::record_payment(tenant_id, payment.method.as_str(), payment.status.as_str());

        match collection {
            None => {
                self.after_completion(&payment, Some(&student)).await;
                Ok(payment)
            }
            Some((operator, phone)) => self.initiate_collection(payment, operator, phone).await,
        }
    }

    async fn initiate_collection(
        &self,
        payment: Payment,
        operator: MobileOperator,
        phone: String,
    ) -> SettlementResult<Payment> {
        let request = CollectionRequest {
            amount: payment.amount,
            phone,
            reference: payment.transaction_id.clone(),
            operator,
        };
        let timeout = self.settings.gateway_timeout;
        let result = match tokio::time::timeout(timeout, self.gateway.initiate_collection(&request))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(timeout)),
        };

        match result {
            Ok(ack) => {
                let transition = PaymentTransition::Acknowledged {
                    processing: ack.is_processing(),
                    provider_reference: ack.provider_reference,
                };
                match self
                    .store
                    .transition_payment(&payment.id, &[PaymentStatus::Pending], &transition)
                    .await?
                {
                    Some(updated) => Ok(updated),
                    // the webhook beat us to it
                    None => self
                        .store
                        .get_payment(&payment.tenant_id, &payment.id)
                        .await?
                        .ok_or_else(|| SettlementError::not_found("payment", &payment.id)),
                }
            }
            Err(gateway_error) => {
                let reason = gateway_error.to_string();
                let failed = self
                    .store
                    .transition_payment(
                        &payment.id,
                        &PaymentStatus::SETTLEABLE,
                        &PaymentTransition::Failed {
                            reason: reason.clone(),
                        },
                    )
                    .await?;
                tracing::warn!(
                    tenant_id = %payment.tenant_id,
                    payment_id = %payment.id,
                    transaction_id = %payment.transaction_id,
                    error = %reason,
                    marked_failed = failed.is_some(),
                    "Gateway initiation failed"
                );
                metrics::record_payment(
                    &payment.tenant_id,
                    payment.method.as_str(),
                    PaymentStatus::Failed.as_str(),
                );
                Err(SettlementError::Gateway(gateway_error))
            }
        }
    }

    pub async fn void_payment(
        &self,
        tenant_id: &str,
        actor: &Actor,
        id: &str,
        reason: &str,
    ) -> SettlementResult<Payment> {
        require_staff(actor)?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(SettlementError::Validation("a void reason is required".into()));
        }

        let payment = self
            .store
            .get_payment(tenant_id, id)
            .await?
            .ok_or_else(|| SettlementError::not_found("payment", id))?;
        if payment.status == PaymentStatus::Cancelled {
            return Err(SettlementError::Conflict("payment is already cancelled".into()));
        }

        let transition = PaymentTransition::Voided {
            reason: reason.to_string(),
            actor_id: actor.user_id.clone(),
            at: Utc::now(),
        };
        let voided = self
            .store
            .transition_payment(id, &PaymentStatus::VOIDABLE, &transition)
            .await?
            .ok_or_else(|| SettlementError::Conflict("payment is already cancelled".into()))?;

        tracing::info!(
            tenant_id = %tenant_id,
            payment_id = %id,
            previous_status = payment.status.as_str(),
            voided_by = %actor.user_id,
            reason = %reason,
            "Payment voided"
        );
        metrics::record_payment(tenant_id, voided.method.as_str(), voided.status.as_str());
        Ok(voided)
    }

    pub async fn get_payment(
        &self,
        tenant_id: &str,
        actor: &Actor,
        id: &str,
    ) -> SettlementResult<Payment> {
        let payment = self
            .store
            .get_payment(tenant_id, id)
            .await?
            .ok_or_else(|| SettlementError::not_found("payment", id))?;
        if !actor.is_staff() {
            let student = self.student(tenant_id, &payment.student_id).await?;
            self.authorize_for_student(actor, &student)?;
        }
        Ok(payment)
    }

    /// Staff see the whole tenant; guardians must name a student they may act for.
    pub async fn list_payments(
        &self,
        tenant_id: &str,
        actor: &Actor,
        filter: &PaymentFilter,
    ) -> SettlementResult<(Vec<Payment>, u64)> {
        if !actor.is_staff() {
            let student_id = filter.student_id.as_deref().ok_or_else(|| {
                SettlementError::Unauthorized("guardians must filter by student".into())
            })?;
            let student = self.student(tenant_id, student_id).await?;
            self.authorize_for_student(actor, &student)?;
        }
        Ok(self.store.list_payments(tenant_id, filter).await?)
    }

    /// Apply a gateway outcome to a student payment.
    ///
    /// Only the caller whose conditional update wins runs the side effects,
    /// so duplicate deliveries are no-ops.
    pub async fn reconcile(
        &self,
        payment: &Payment,
        outcome: &GatewayOutcome,
    ) -> SettlementResult<ReconcileOutcome> {
        if payment.status == PaymentStatus::Completed {
            return Ok(ReconcileOutcome::AlreadyProcessed);
        }

        let transition = match outcome {
            GatewayOutcome::Successful => PaymentTransition::Completed { at: Utc::now() },
            GatewayOutcome::Failed { reason } => PaymentTransition::Failed {
                reason: reason.clone(),
            },
        };
        let Some(updated) = self
            .store
            .transition_payment(&payment.id, &PaymentStatus::SETTLEABLE, &transition)
            .await?
        else {
            tracing::warn!(
                tenant_id = %payment.tenant_id,
                payment_id = %payment.id,
                reference = %payment.transaction_id,
                status = payment.status.as_str(),
                outcome = ?outcome,
                "Webhook for a payment that is no longer open"
            );
            return Ok(ReconcileOutcome::AlreadyProcessed);
        };

        metrics::record_payment(&updated.tenant_id, updated.method.as_str(), updated.status.as_str());
        tracing::info!(
            tenant_id = %updated.tenant_id,
            payment_id = %updated.id,
            reference = %updated.transaction_id,
            status = updated.status.as_str(),
            "Payment reconciled"
        );

        let student = self
            .store
            .get_student(&updated.tenant_id, &updated.student_id)
            .await?;
        match outcome {
            GatewayOutcome::Successful => {
                self.after_completion(&updated, student.as_ref()).await;
                Ok(ReconcileOutcome::Completed)
            }
            GatewayOutcome::Failed { reason } => {
                self.notifications.enqueue(NotificationEvent::PaymentFailed {
                    tenant_id: updated.tenant_id.clone(),
                    payment_id: updated.id.clone(),
                    student_id: updated.student_id.clone(),
                    transaction_id: updated.transaction_id.clone(),
                    reason: reason.clone(),
                    recipient_email: student.and_then(|s| s.guardian_email),
                });
                Ok(ReconcileOutcome::Failed)
            }
        }
    }

    async fn after_completion(&self, payment: &Payment, student: Option<&StudentRecord>) {
        match self.allocate(payment).await {
            Ok(credit) if credit > Decimal::ZERO => tracing::info!(
                payment_id = %payment.id,
                student_id = %payment.student_id,
                credit = %credit,
                "Payment exceeds open obligations, remainder held as credit"
            ),
            Ok(_) => {}
            Err(e) => tracing::error!(
                payment_id = %payment.id,
                student_id = %payment.student_id,
                error = %e,
                "Failed to allocate payment to obligations"
            ),
        }

        self.notifications.enqueue(NotificationEvent::PaymentReceipt {
            tenant_id: payment.tenant_id.clone(),
            payment_id: payment.id.clone(),
            student_id: payment.student_id.clone(),
            transaction_id: payment.transaction_id.clone(),
            amount: payment.amount,
            method: payment.method,
            recipient_email: student.and_then(|s| s.guardian_email.clone()),
        });
    }

    /// Spread a completed payment over open obligations, earliest due first.
    /// Returns the unallocated remainder.
    async fn allocate(&self, payment: &Payment) -> SettlementResult<Decimal> {
        let mut obligations = self
            .store
            .list_student_obligations(&payment.tenant_id, &payment.student_id)
            .await?;
        obligations.sort_by_key(allocation_order);

        let mut remaining = payment.amount;
        for obligation in obligations {
            if remaining <= Decimal::ZERO {
                break;
            }
            remaining -= self.apply_to(obligation, remaining).await?;
        }
        Ok(remaining)
    }

    async fn apply_to(&self, mut obligation: FeeObligation, available: Decimal) -> SettlementResult<Decimal> {
        for _ in 0..ALLOCATION_ATTEMPTS {
            let open = obligation.remaining();
            if open <= Decimal::ZERO {
                return Ok(Decimal::ZERO);
            }
            let applied = open.min(available);
            if self
                .store
                .apply_obligation_payment(
                    &obligation.id,
                    obligation.amount_paid,
                    obligation.amount_paid + applied,
                )
                .await?
            {
                return Ok(applied);
            }
            match self
                .store
                .find_obligation(&obligation.student_id, &obligation.fee_template_id)
                .await?
            {
                Some(fresh) => obligation = fresh,
                None => return Ok(Decimal::ZERO),
            }
        }
        tracing::warn!(obligation_id = %obligation.id, "Obligation too contended to allocate");
        Ok(Decimal::ZERO)
    }
}

fn allocation_order(o: &FeeObligation) -> (bool, Option<chrono::NaiveDate>, chrono::DateTime<Utc>) {
    (o.due_date.is_none(), o.due_date, o.created_at)
}

fn is_gateway_reference(id: &str) -> bool {
    id.starts_with(STUDENT_PAYMENT_PREFIX) || id.starts_with(SUBSCRIPTION_PAYMENT_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn surcharge_is_added_on_top() {
        assert_eq!(with_surcharge(dec!(100), dec!(2.5)), dec!(102.5));
        assert_eq!(with_surcharge(dec!(1000), dec!(2.5)), dec!(1025));
        assert_eq!(with_surcharge(dec!(333.33), dec!(2.5)), dec!(341.66));
    }

    #[test]
    fn phone_numbers_are_digits_with_optional_plus() {
        assert!(valid_phone("+237670000000"));
        assert!(valid_phone("670000000"));
        assert!(!valid_phone("67-00-00"));
        assert!(!valid_phone("+12"));
    }

    #[test]
    fn gateway_prefixes_are_reserved() {
        assert!(is_gateway_reference("TXN-1"));
        assert!(is_gateway_reference("SUB-1"));
        assert!(!is_gateway_reference("RCPT-0001"));
        assert!(!is_gateway_reference("txn-1"));
    }

    #[test]
    fn dated_obligations_allocate_before_undated() {
        let now = Utc::now();
        let mk = |id: &str, due: Option<&str>| FeeObligation {
            id: id.into(),
            tenant_id: "t1".into(),
            student_id: "s1".into(),
            fee_template_id: id.into(),
            amount_due: dec!(100),
            amount_paid: Decimal::ZERO,
            due_date: due.map(|d| d.parse().unwrap()),
            created_at: now,
            updated_at: now,
        };
        let mut obligations = vec![
            mk("undated", None),
            mk("late", Some("2026-03-01")),
            mk("early", Some("2026-01-15")),
        ];
        obligations.sort_by_key(allocation_order);
        let ids: Vec<_> = obligations.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, ["early", "late", "undated"]);
    }
}
