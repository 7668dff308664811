//! Subscription billing: the platform's own charges to a school.
//!
//! Shares the gateway and the webhook with the student ledger; its
//! references carry the `SUB-` prefix.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::gateway::{CollectionGateway, CollectionRequest, GatewayError};
use super::ledger::{valid_phone, with_surcharge};
use super::notifier::{NotificationEvent, NotificationQueue};
use super::reconciler::{GatewayOutcome, ReconcileOutcome};
use super::store::SettlementStore;
use super::{require_admin, require_staff};
use crate::config::PaymentSettings;
use crate::error::{SettlementError, SettlementResult};
use crate::models::{
    Actor, BillingCycle, MobileOperator, ReferenceKind, SubscriptionPayment,
    SubscriptionPaymentStatus, SubscriptionPlan, SubscriptionTransition, TenantStatus,
    TenantSubscription,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionQuote {
    pub plan_id: String,
    pub billing_cycle: BillingCycle,
    pub base_amount: Decimal,
    pub overage_amount: Decimal,
    pub total_amount: Decimal,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// Price a plan for one billing cycle.
///
/// Students above the plan's quota are charged per month of the period.
/// A renewal of a still-running subscription starts when it ends.
pub fn quote(
    plan: &SubscriptionPlan,
    cycle: BillingCycle,
    tenant: &TenantSubscription,
    now: DateTime<Utc>,
) -> SubscriptionQuote {
    let base_amount = plan.monthly_price * Decimal::from(cycle.billable_months());
    let extra_students = tenant.student_count.saturating_sub(plan.max_students);
    let overage_amount =
        Decimal::from(extra_students) * plan.overage_per_student * Decimal::from(cycle.months());

    let period_start = match (tenant.status, tenant.subscription_ends_at) {
        (TenantStatus::Active, Some(ends)) if ends > now => ends,
        _ => now,
    };

    SubscriptionQuote {
        plan_id: plan.id.clone(),
        billing_cycle: cycle,
        base_amount,
        overage_amount,
        total_amount: base_amount + overage_amount,
        period_start,
        period_end: cycle.period_end(period_start),
    }
}

#[derive(Clone)]
pub struct SubscriptionBilling {
    store: Arc<dyn SettlementStore>,
    gateway: Arc<dyn CollectionGateway>,
    notifications: NotificationQueue,
    settings: PaymentSettings,
}

impl SubscriptionBilling {
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

    pub async fn get_subscription(&self, tenant_id: &str) -> SettlementResult<TenantSubscription> {
        self.store
            .get_tenant_subscription(tenant_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("tenant subscription", tenant_id))
    }

    pub async fn list_plans(&self) -> SettlementResult<Vec<SubscriptionPlan>> {
        Ok(self.store.list_plans().await?)
    }

    async fn plan(&self, plan_id: &str) -> SettlementResult<SubscriptionPlan> {
        self.store
            .get_plan(plan_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("plan", plan_id))
    }

    fn new_payment(
        &self,
        tenant_id: &str,
        actor: &Actor,
        quote: SubscriptionQuote,
        collection: Option<(MobileOperator, String)>,
    ) -> SubscriptionPayment {
        let charged_amount = if collection.is_some() {
            with_surcharge(quote.total_amount, self.settings.mobile_money_surcharge_percent)
        } else {
            quote.total_amount
        };
        let now = Utc::now();
        SubscriptionPayment {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            plan_id: quote.plan_id,
            reference: ReferenceKind::new_subscription_payment(),
            billing_cycle: quote.billing_cycle,
            base_amount: quote.base_amount,
            overage_amount: quote.overage_amount,
            total_amount: quote.total_amount,
            surcharge: charged_amount - quote.total_amount,
            charged_amount,
            period_start: quote.period_start,
            period_end: quote.period_end,
            status: SubscriptionPaymentStatus::Pending,
            operator: collection.as_ref().map(|(op, _)| *op),
            phone_number: collection.map(|(_, phone)| phone),
            provider_reference: None,
            failure_reason: None,
            initiated_by: actor.user_id.clone(),
            confirmed_by: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record an upgrade to be paid offline and confirmed by an administrator.
    /// A free plan activates on the spot.
    pub async fn initiate_upgrade(
        &self,
        tenant_id: &str,
        actor: &Actor,
        plan_id: &str,
        cycle: BillingCycle,
    ) -> SettlementResult<SubscriptionPayment> {
        require_staff(actor)?;
        let tenant = self.get_subscription(tenant_id).await?;
        let plan = self.plan(plan_id).await?;
        let quote = quote(&plan, cycle, &tenant, Utc::now());

        let payment = self.new_payment(tenant_id, actor, quote, None);
        self.store.insert_subscription_payment(&payment).await?;
        tracing::info!(
            tenant_id = %tenant_id,
            subscription_payment_id = %payment.id,
            reference = %payment.reference,
            plan_id = %plan_id,
            total = %payment.total_amount,
            "Subscription upgrade initiated"
        );

        if payment.total_amount.is_zero() {
            return self.complete(&payment, Some(actor.user_id.clone())).await;
        }
        Ok(payment)
    }

    pub async fn pay_with_mobile_money(
        &self,
        tenant_id: &str,
        actor: &Actor,
        plan_id: &str,
        cycle: BillingCycle,
        phone_number: &str,
        operator: MobileOperator,
    ) -> SettlementResult<SubscriptionPayment> {
        require_staff(actor)?;
        let phone = phone_number.trim();
        if !valid_phone(phone) {
            return Err(SettlementError::Validation(
                "a valid phone number is required for mobile money".into(),
            ));
        }
        let tenant = self.get_subscription(tenant_id).await?;
        let plan = self.plan(plan_id).await?;
        let quote = quote(&plan, cycle, &tenant, Utc::now());
        if quote.total_amount.is_zero() {
            return Err(SettlementError::Validation(
                "nothing to collect for a free plan".into(),
            ));
        }

        let payment = self.new_payment(tenant_id, actor, quote, Some((operator, phone.to_string())));
        self.store.insert_subscription_payment(&payment).await?;

        let request = CollectionRequest {
            amount: payment.charged_amount,
            phone: phone.to_string(),
            reference: payment.reference.clone(),
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
                let transition = SubscriptionTransition::Acknowledged {
                    processing: ack.is_processing(),
                    provider_reference: ack.provider_reference,
                };
                let updated = self
                    .store
                    .transition_subscription_payment(
                        &payment.id,
                        &[SubscriptionPaymentStatus::Pending],
                        &transition,
                    )
                    .await?;
                match updated {
                    Some(p) => Ok(p),
                    None => self
                        .store
                        .get_subscription_payment(tenant_id, &payment.id)
                        .await?
                        .ok_or_else(|| SettlementError::not_found("subscription payment", &payment.id)),
                }
            }
            Err(e) => {
                self.store
                    .transition_subscription_payment(
                        &payment.id,
                        &SubscriptionPaymentStatus::SETTLEABLE,
                        &SubscriptionTransition::Failed {
                            reason: e.to_string(),
                        },
                    )
                    .await?;
                tracing::warn!(
                    tenant_id = %tenant_id,
                    reference = %payment.reference,
                    error = %e,
                    "Subscription collection initiation failed"
                );
                Err(SettlementError::Gateway(e))
            }
        }
    }

    /// Manual override: an administrator attests the payment was received.
    pub async fn confirm_payment(
        &self,
        tenant_id: &str,
        actor: &Actor,
        payment_id: &str,
    ) -> SettlementResult<SubscriptionPayment> {
        require_admin(actor)?;
        let payment = self
            .store
            .get_subscription_payment(tenant_id, payment_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("subscription payment", payment_id))?;
        if payment.status.is_terminal() {
            return Err(SettlementError::Conflict(format!(
                "subscription payment is already {}",
                payment.status.as_str()
            )));
        }
        self.complete(&payment, Some(actor.user_id.clone())).await
    }

    /// Apply a gateway outcome to a subscription payment.
    pub async fn reconcile(
        &self,
        payment: &SubscriptionPayment,
        outcome: &GatewayOutcome,
    ) -> SettlementResult<ReconcileOutcome> {
        if payment.status == SubscriptionPaymentStatus::Completed {
            return Ok(ReconcileOutcome::AlreadyProcessed);
        }
        match outcome {
            GatewayOutcome::Successful => match self.complete(payment, None).await {
                Ok(_) => Ok(ReconcileOutcome::Completed),
                Err(SettlementError::Conflict(_)) => Ok(ReconcileOutcome::AlreadyProcessed),
                Err(e) => Err(e),
            },
            GatewayOutcome::Failed { reason } => {
                let failed = self
                    .store
                    .transition_subscription_payment(
                        &payment.id,
                        &SubscriptionPaymentStatus::SETTLEABLE,
                        &SubscriptionTransition::Failed {
                            reason: reason.clone(),
                        },
                    )
                    .await?;
                if failed.is_some() {
                    tracing::info!(
                        tenant_id = %payment.tenant_id,
                        reference = %payment.reference,
                        reason = %reason,
                        "Subscription payment failed"
                    );
                    Ok(ReconcileOutcome::Failed)
                } else {
                    Ok(ReconcileOutcome::AlreadyProcessed)
                }
            }
        }
    }

    /// Complete an open payment and activate it. Only the caller whose
    /// conditional update wins activates, so the tenant changes once.
    async fn complete(
        &self,
        payment: &SubscriptionPayment,
        confirmed_by: Option<String>,
    ) -> SettlementResult<SubscriptionPayment> {
        let transition = SubscriptionTransition::Completed {
            at: Utc::now(),
            confirmed_by,
        };
        let completed = self
            .store
            .transition_subscription_payment(
                &payment.id,
                &SubscriptionPaymentStatus::SETTLEABLE,
                &transition,
            )
            .await?
            .ok_or_else(|| {
                tracing::warn!(
                    tenant_id = %payment.tenant_id,
                    reference = %payment.reference,
                    "Subscription payment is no longer open"
                );
                SettlementError::Conflict("subscription payment is no longer open".into())
            })?;

        self.activate_subscription_from_payment(&completed).await?;
        Ok(completed)
    }

    /// Move the tenant onto the purchased plan for the paid period.
    pub async fn activate_subscription_from_payment(
        &self,
        payment: &SubscriptionPayment,
    ) -> SettlementResult<TenantSubscription> {
        let plan = self.store.get_plan(&payment.plan_id).await?.ok_or_else(|| {
            SettlementError::IntegrityFault(format!(
                "plan {} for {} no longer exists",
                payment.plan_id, payment.reference
            ))
        })?;
        let now = Utc::now();
        let mut tenant = self
            .store
            .get_tenant_subscription(&payment.tenant_id)
            .await?
            .unwrap_or_else(|| TenantSubscription::trial(&payment.tenant_id, now));

        tenant.activate(&plan, payment.period_end, now);
        self.store.save_tenant_subscription(&tenant).await?;

        tracing::info!(
            tenant_id = %tenant.tenant_id,
            reference = %payment.reference,
            tier = ?tenant.tier,
            subscription_ends_at = %payment.period_end,
            "Subscription activated"
        );
        self.notifications
            .enqueue(NotificationEvent::SubscriptionActivated {
                tenant_id: tenant.tenant_id.clone(),
                tier: tenant.tier,
                period_end: payment.period_end,
            });
        Ok(tenant)
    }

    /// Cancel without deleting history; access runs to the end of the paid period.
    pub async fn cancel_subscription(
        &self,
        tenant_id: &str,
        actor: &Actor,
    ) -> SettlementResult<TenantSubscription> {
        require_admin(actor)?;
        let mut tenant = self.get_subscription(tenant_id).await?;
        if tenant.status == TenantStatus::Cancelled {
            return Err(SettlementError::Conflict("subscription is already cancelled".into()));
        }
        let now = Utc::now();
        tenant.status = TenantStatus::Cancelled;
        tenant.cancelled_at = Some(now);
        tenant.updated_at = now;
        self.store.save_tenant_subscription(&tenant).await?;

        tracing::info!(
            tenant_id = %tenant_id,
            cancelled_by = %actor.user_id,
            access_until = ?tenant.subscription_ends_at,
            "Subscription cancelled"
        );
        Ok(tenant)
    }

    pub async fn list_subscription_payments(
        &self,
        tenant_id: &str,
        actor: &Actor,
        limit: u64,
        offset: u64,
    ) -> SettlementResult<(Vec<SubscriptionPayment>, u64)> {
        require_staff(actor)?;
        Ok(self
            .store
            .list_subscription_payments(tenant_id, limit, offset)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubscriptionTier;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn basic() -> SubscriptionPlan {
        SubscriptionPlan {
            id: "plan-basic".into(),
            tier: SubscriptionTier::Basic,
            name: "Basic".into(),
            monthly_price: dec!(5000),
            max_students: 100,
            max_staff: 10,
            storage_mb: 2048,
            overage_per_student: dec!(25),
        }
    }

    #[test]
    fn annual_quote_gives_two_months_free() {
        let now = Utc::now();
        let tenant = TenantSubscription::trial("t1", now);
        let q = quote(&basic(), BillingCycle::Annually, &tenant, now);
        assert_eq!(q.base_amount, dec!(50000));
        assert_eq!(q.overage_amount, Decimal::ZERO);
        assert_eq!(q.period_start, now);
    }

    #[test]
    fn overage_charges_each_extra_student_per_month() {
        let now = Utc::now();
        let mut tenant = TenantSubscription::trial("t1", now);
        tenant.student_count = 130;
        let q = quote(&basic(), BillingCycle::Quarterly, &tenant, now);
        // 30 extra students * 25 * 3 months
        assert_eq!(q.overage_amount, dec!(2250));
        assert_eq!(q.total_amount, dec!(17250));
    }

    #[test]
    fn renewal_starts_when_the_current_period_ends() {
        let now = Utc::now();
        let mut tenant = TenantSubscription::trial("t1", now);
        tenant.status = TenantStatus::Active;
        tenant.subscription_ends_at = Some(now + Duration::days(10));
        let q = quote(&basic(), BillingCycle::Monthly, &tenant, now);
        assert_eq!(q.period_start, now + Duration::days(10));
    }
}
