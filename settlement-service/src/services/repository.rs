use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, to_bson, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{
    FindOneAndUpdateOptions, FindOptions, IndexOptions, ReplaceOptions, ReturnDocument,
};
use mongodb::{Collection, Database, IndexModel};
use rust_decimal::Decimal;
use serde::Serialize;

use super::store::{SettlementStore, StoreError, StoreResult};
use crate::models::{
    FeeObligation, FeeTemplate, Payment, PaymentFilter, PaymentMethod, PaymentStatus,
    PaymentTransition, Scholarship, StudentRecord, SubscriptionPayment, SubscriptionPaymentStatus,
    SubscriptionPlan, SubscriptionTransition, TenantSubscription,
};

const DUPLICATE_KEY: i32 = 11000;

/// MongoDB-backed ledger. Documents are keyed by the string `id` field under
/// unique indexes; the driver-assigned `_id` is never read.
#[derive(Clone)]
pub struct MongoSettlementStore {
    db: Database,
    templates: Collection<FeeTemplate>,
    scholarships: Collection<Scholarship>,
    students: Collection<StudentRecord>,
    obligations: Collection<FeeObligation>,
    payments: Collection<Payment>,
    plans: Collection<SubscriptionPlan>,
    tenants: Collection<TenantSubscription>,
    subscription_payments: Collection<SubscriptionPayment>,
}

fn index(keys: Document, name: &str, unique: bool) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(
            IndexOptions::builder()
                .name(name.to_string())
                .unique(unique)
                .build(),
        )
        .build()
}

fn bson_of<T: Serialize>(value: &T) -> StoreResult<Bson> {
    to_bson(value).map_err(|e| StoreError::Backend(anyhow::Error::new(e)))
}

fn map_write_error(err: mongodb::error::Error, what: &str) -> StoreError {
    let duplicate = matches!(
        *err.kind,
        ErrorKind::Write(WriteFailure::WriteError(ref e)) if e.code == DUPLICATE_KEY
    );
    if duplicate {
        StoreError::Duplicate(what.to_string())
    } else {
        StoreError::Backend(anyhow::Error::new(err))
    }
}

fn backend(err: mongodb::error::Error) -> StoreError {
    StoreError::Backend(anyhow::Error::new(err))
}

fn status_filter<S: Serialize>(allowed_from: &[S]) -> StoreResult<Bson> {
    let statuses = allowed_from
        .iter()
        .map(bson_of)
        .collect::<StoreResult<Vec<_>>>()?;
    Ok(doc! { "$in": statuses }.into())
}

fn payment_update(transition: &PaymentTransition, now: DateTime<Utc>) -> StoreResult<Document> {
    let mut set = doc! {
        "status": bson_of(&transition.target_status())?,
        "updated_at": bson_of(&now)?,
    };
    match transition {
        PaymentTransition::Acknowledged {
            provider_reference, ..
        } => {
            if let Some(reference) = provider_reference {
                set.insert("provider_reference", reference.as_str());
            }
        }
        PaymentTransition::Completed { at } => {
            set.insert("completed_at", bson_of(at)?);
        }
        PaymentTransition::Failed { reason } => {
            set.insert("failure_reason", reason.as_str());
        }
        PaymentTransition::Voided {
            reason,
            actor_id,
            at,
        } => {
            set.insert("void_reason", reason.as_str());
            set.insert("voided_by", actor_id.as_str());
            set.insert("voided_at", bson_of(at)?);
        }
    }
    Ok(doc! { "$set": set })
}

fn subscription_update(
    transition: &SubscriptionTransition,
    now: DateTime<Utc>,
) -> StoreResult<Document> {
    let mut set = doc! {
        "status": bson_of(&transition.target_status())?,
        "updated_at": bson_of(&now)?,
    };
    match transition {
        SubscriptionTransition::Acknowledged {
            provider_reference, ..
        } => {
            if let Some(reference) = provider_reference {
                set.insert("provider_reference", reference.as_str());
            }
        }
        SubscriptionTransition::Completed { at, confirmed_by } => {
            set.insert("completed_at", bson_of(at)?);
            set.insert("confirmed_by", bson_of(confirmed_by)?);
        }
        SubscriptionTransition::Failed { reason } => {
            set.insert("failure_reason", reason.as_str());
        }
    }
    Ok(doc! { "$set": set })
}

fn after_update() -> FindOneAndUpdateOptions {
    FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build()
}

fn newest_first(limit: u64, offset: u64) -> FindOptions {
    FindOptions::builder()
        .sort(doc! { "created_at": -1 })
        .skip(offset)
        .limit((limit > 0).then_some(limit as i64))
        .build()
}

impl MongoSettlementStore {
    pub fn new(db: &Database) -> Self {
        Self {
            db: db.clone(),
            templates: db.collection("fee_templates"),
            scholarships: db.collection("scholarships"),
            students: db.collection("students"),
            obligations: db.collection("fee_obligations"),
            payments: db.collection("payments"),
            plans: db.collection("subscription_plans"),
            tenants: db.collection("tenant_subscriptions"),
            subscription_payments: db.collection("subscription_payments"),
        }
    }

    /// Create the unique indexes the ledger's invariants rely on.
    pub async fn init_indexes(&self) -> anyhow::Result<()> {
        self.templates
            .create_indexes(
                [
                    index(doc! { "id": 1 }, "fee_template_id_idx", true),
                    index(doc! { "tenant_id": 1, "created_at": 1 }, "tenant_fee_template_idx", false),
                ],
                None,
            )
            .await?;

        self.scholarships
            .create_indexes([index(doc! { "id": 1 }, "scholarship_id_idx", true)], None)
            .await?;

        self.students
            .create_indexes(
                [
                    index(doc! { "id": 1 }, "student_id_idx", true),
                    index(
                        doc! { "tenant_id": 1, "class_id": 1, "active": 1 },
                        "tenant_class_student_idx",
                        false,
                    ),
                ],
                None,
            )
            .await?;

        // One obligation per (student, template); the assignment engine
        // relies on this to stay idempotent under concurrent runs.
        self.obligations
            .create_indexes(
                [
                    index(doc! { "id": 1 }, "obligation_id_idx", true),
                    index(
                        doc! { "student_id": 1, "fee_template_id": 1 },
                        "student_template_obligation_idx",
                        true,
                    ),
                    index(doc! { "tenant_id": 1, "student_id": 1 }, "tenant_student_obligation_idx", false),
                ],
                None,
            )
            .await?;

        self.payments
            .create_indexes(
                [
                    index(doc! { "id": 1 }, "payment_id_idx", true),
                    index(
                        doc! { "tenant_id": 1, "transaction_id": 1 },
                        "tenant_transaction_idx",
                        true,
                    ),
                    // webhook references are global across tenants
                    IndexModel::builder()
                        .keys(doc! { "transaction_id": 1 })
                        .options(
                            IndexOptions::builder()
                                .name("gateway_reference_idx".to_string())
                                .unique(true)
                                .partial_filter_expression(
                                    doc! { "method": PaymentMethod::MobileMoney.as_str() },
                                )
                                .build(),
                        )
                        .build(),
                    index(doc! { "tenant_id": 1, "status": 1 }, "tenant_status_payment_idx", false),
                    index(
                        doc! { "tenant_id": 1, "student_id": 1, "created_at": -1 },
                        "tenant_student_payment_idx",
                        false,
                    ),
                ],
                None,
            )
            .await?;

        self.plans
            .create_indexes([index(doc! { "id": 1 }, "plan_id_idx", true)], None)
            .await?;

        self.tenants
            .create_indexes([index(doc! { "tenant_id": 1 }, "tenant_subscription_idx", true)], None)
            .await?;

        self.subscription_payments
            .create_indexes(
                [
                    index(doc! { "id": 1 }, "subscription_payment_id_idx", true),
                    index(doc! { "reference": 1 }, "subscription_reference_idx", true),
                    index(
                        doc! { "tenant_id": 1, "created_at": -1 },
                        "tenant_subscription_payment_idx",
                        false,
                    ),
                ],
                None,
            )
            .await?;

        tracing::info!("Settlement service indexes initialized");
        Ok(())
    }
}

#[async_trait]
impl SettlementStore for MongoSettlementStore {
    async fn insert_fee_template(&self, template: &FeeTemplate) -> StoreResult<()> {
        self.templates
            .insert_one(template, None)
            .await
            .map_err(|e| map_write_error(e, "fee template"))?;
        Ok(())
    }

    async fn get_fee_template(&self, tenant_id: &str, id: &str) -> StoreResult<Option<FeeTemplate>> {
        self.templates
            .find_one(doc! { "id": id, "tenant_id": tenant_id }, None)
            .await
            .map_err(backend)
    }

    async fn list_fee_templates(&self, tenant_id: &str) -> StoreResult<Vec<FeeTemplate>> {
        let options = FindOptions::builder().sort(doc! { "created_at": 1 }).build();
        let cursor = self
            .templates
            .find(doc! { "tenant_id": tenant_id }, options)
            .await
            .map_err(backend)?;
        cursor.try_collect().await.map_err(backend)
    }

    async fn update_fee_template(&self, template: &FeeTemplate) -> StoreResult<bool> {
        let result = self
            .templates
            .replace_one(
                doc! { "id": template.id.as_str(), "tenant_id": template.tenant_id.as_str() },
                template,
                None,
            )
            .await
            .map_err(backend)?;
        Ok(result.matched_count > 0)
    }

    async fn delete_fee_template(&self, tenant_id: &str, id: &str) -> StoreResult<bool> {
        let result = self
            .templates
            .delete_one(doc! { "id": id, "tenant_id": tenant_id }, None)
            .await
            .map_err(backend)?;
        Ok(result.deleted_count > 0)
    }

    async fn insert_scholarship(&self, scholarship: &Scholarship) -> StoreResult<()> {
        self.scholarships
            .insert_one(scholarship, None)
            .await
            .map_err(|e| map_write_error(e, "scholarship"))?;
        Ok(())
    }

    async fn get_scholarship(&self, tenant_id: &str, id: &str) -> StoreResult<Option<Scholarship>> {
        self.scholarships
            .find_one(doc! { "id": id, "tenant_id": tenant_id }, None)
            .await
            .map_err(backend)
    }

    async fn get_student(
        &self,
        tenant_id: &str,
        student_id: &str,
    ) -> StoreResult<Option<StudentRecord>> {
        self.students
            .find_one(doc! { "id": student_id, "tenant_id": tenant_id }, None)
            .await
            .map_err(backend)
    }

    async fn list_active_students_in_class(
        &self,
        tenant_id: &str,
        class_id: &str,
    ) -> StoreResult<Vec<StudentRecord>> {
        let options = FindOptions::builder().sort(doc! { "id": 1 }).build();
        let cursor = self
            .students
            .find(
                doc! { "tenant_id": tenant_id, "class_id": class_id, "active": true },
                options,
            )
            .await
            .map_err(backend)?;
        cursor.try_collect().await.map_err(backend)
    }

    async fn insert_obligation(&self, obligation: &FeeObligation) -> StoreResult<()> {
        self.obligations
            .insert_one(obligation, None)
            .await
            .map_err(|e| map_write_error(e, "fee obligation"))?;
        Ok(())
    }

    async fn find_obligation(
        &self,
        student_id: &str,
        fee_template_id: &str,
    ) -> StoreResult<Option<FeeObligation>> {
        self.obligations
            .find_one(
                doc! { "student_id": student_id, "fee_template_id": fee_template_id },
                None,
            )
            .await
            .map_err(backend)
    }

    async fn list_student_obligations(
        &self,
        tenant_id: &str,
        student_id: &str,
    ) -> StoreResult<Vec<FeeObligation>> {
        let cursor = self
            .obligations
            .find(doc! { "tenant_id": tenant_id, "student_id": student_id }, None)
            .await
            .map_err(backend)?;
        cursor.try_collect().await.map_err(backend)
    }

    async fn list_tenant_obligations(&self, tenant_id: &str) -> StoreResult<Vec<FeeObligation>> {
        let cursor = self
            .obligations
            .find(doc! { "tenant_id": tenant_id }, None)
            .await
            .map_err(backend)?;
        cursor.try_collect().await.map_err(backend)
    }

    async fn list_template_obligations(
        &self,
        tenant_id: &str,
        fee_template_id: &str,
    ) -> StoreResult<Vec<FeeObligation>> {
        let cursor = self
            .obligations
            .find(
                doc! { "tenant_id": tenant_id, "fee_template_id": fee_template_id },
                None,
            )
            .await
            .map_err(backend)?;
        cursor.try_collect().await.map_err(backend)
    }

    async fn apply_obligation_payment(
        &self,
        obligation_id: &str,
        expected_paid: Decimal,
        new_paid: Decimal,
    ) -> StoreResult<bool> {
        let result = self
            .obligations
            .update_one(
                doc! { "id": obligation_id, "amount_paid": bson_of(&expected_paid)? },
                doc! { "$set": {
                    "amount_paid": bson_of(&new_paid)?,
                    "updated_at": bson_of(&Utc::now())?,
                } },
                None,
            )
            .await
            .map_err(backend)?;
        Ok(result.modified_count == 1)
    }

    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()> {
        self.payments
            .insert_one(payment, None)
            .await
            .map_err(|e| map_write_error(e, "transaction id"))?;
        Ok(())
    }

    async fn get_payment(&self, tenant_id: &str, id: &str) -> StoreResult<Option<Payment>> {
        self.payments
            .find_one(doc! { "id": id, "tenant_id": tenant_id }, None)
            .await
            .map_err(backend)
    }

    async fn find_gateway_payment(&self, reference: &str) -> StoreResult<Option<Payment>> {
        self.payments
            .find_one(
                doc! { "transaction_id": reference, "method": PaymentMethod::MobileMoney.as_str() },
                None,
            )
            .await
            .map_err(backend)
    }

    async fn transition_payment(
        &self,
        id: &str,
        allowed_from: &[PaymentStatus],
        transition: &PaymentTransition,
    ) -> StoreResult<Option<Payment>> {
        let filter = doc! { "id": id, "status": status_filter(allowed_from)? };
        self.payments
            .find_one_and_update(filter, payment_update(transition, Utc::now())?, after_update())
            .await
            .map_err(backend)
    }

    async fn list_payments(
        &self,
        tenant_id: &str,
        filter: &PaymentFilter,
    ) -> StoreResult<(Vec<Payment>, u64)> {
        let mut query = doc! { "tenant_id": tenant_id };
        if let Some(student_id) = &filter.student_id {
            query.insert("student_id", student_id.as_str());
        }
        if let Some(status) = filter.status {
            query.insert("status", status.as_str());
        }
        if let Some(method) = filter.method {
            query.insert("method", method.as_str());
        }

        let total = self
            .payments
            .count_documents(query.clone(), None)
            .await
            .map_err(backend)?;
        let cursor = self
            .payments
            .find(query, newest_first(filter.limit, filter.offset))
            .await
            .map_err(backend)?;
        let payments = cursor.try_collect().await.map_err(backend)?;
        Ok((payments, total))
    }

    async fn list_tenant_payments_with_status(
        &self,
        tenant_id: &str,
        status: PaymentStatus,
    ) -> StoreResult<Vec<Payment>> {
        let cursor = self
            .payments
            .find(doc! { "tenant_id": tenant_id, "status": status.as_str() }, None)
            .await
            .map_err(backend)?;
        cursor.try_collect().await.map_err(backend)
    }

    async fn get_plan(&self, plan_id: &str) -> StoreResult<Option<SubscriptionPlan>> {
        self.plans
            .find_one(doc! { "id": plan_id }, None)
            .await
            .map_err(backend)
    }

    async fn list_plans(&self) -> StoreResult<Vec<SubscriptionPlan>> {
        let cursor = self.plans.find(doc! {}, None).await.map_err(backend)?;
        let mut plans: Vec<SubscriptionPlan> = cursor.try_collect().await.map_err(backend)?;
        plans.sort_by(|a, b| a.monthly_price.cmp(&b.monthly_price));
        Ok(plans)
    }

    async fn get_tenant_subscription(
        &self,
        tenant_id: &str,
    ) -> StoreResult<Option<TenantSubscription>> {
        self.tenants
            .find_one(doc! { "tenant_id": tenant_id }, None)
            .await
            .map_err(backend)
    }

    async fn save_tenant_subscription(&self, subscription: &TenantSubscription) -> StoreResult<()> {
        let options = ReplaceOptions::builder().upsert(true).build();
        self.tenants
            .replace_one(
                doc! { "tenant_id": subscription.tenant_id.as_str() },
                subscription,
                options,
            )
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn insert_subscription_payment(&self, payment: &SubscriptionPayment) -> StoreResult<()> {
        self.subscription_payments
            .insert_one(payment, None)
            .await
            .map_err(|e| map_write_error(e, "subscription reference"))?;
        Ok(())
    }

    async fn get_subscription_payment(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> StoreResult<Option<SubscriptionPayment>> {
        self.subscription_payments
            .find_one(doc! { "id": id, "tenant_id": tenant_id }, None)
            .await
            .map_err(backend)
    }

    async fn find_subscription_payment_by_reference(
        &self,
        reference: &str,
    ) -> StoreResult<Option<SubscriptionPayment>> {
        self.subscription_payments
            .find_one(doc! { "reference": reference }, None)
            .await
            .map_err(backend)
    }

    async fn transition_subscription_payment(
        &self,
        id: &str,
        allowed_from: &[SubscriptionPaymentStatus],
        transition: &SubscriptionTransition,
    ) -> StoreResult<Option<SubscriptionPayment>> {
        let filter = doc! { "id": id, "status": status_filter(allowed_from)? };
        self.subscription_payments
            .find_one_and_update(
                filter,
                subscription_update(transition, Utc::now())?,
                after_update(),
            )
            .await
            .map_err(backend)
    }

    async fn list_subscription_payments(
        &self,
        tenant_id: &str,
        limit: u64,
        offset: u64,
    ) -> StoreResult<(Vec<SubscriptionPayment>, u64)> {
        let query = doc! { "tenant_id": tenant_id };
        let total = self
            .subscription_payments
            .count_documents(query.clone(), None)
            .await
            .map_err(backend)?;
        let cursor = self
            .subscription_payments
            .find(query, newest_first(limit, offset))
            .await
            .map_err(backend)?;
        let payments = cursor.try_collect().await.map_err(backend)?;
        Ok((payments, total))
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.db
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn void_update_stamps_audit_fields() {
        let now = Utc::now();
        let update = payment_update(
            &PaymentTransition::Voided {
                reason: "duplicate entry".into(),
                actor_id: "bursar-1".into(),
                at: now,
            },
            now,
        )
        .unwrap();
        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_str("status").unwrap(), "CANCELLED");
        assert_eq!(set.get_str("void_reason").unwrap(), "duplicate entry");
        assert_eq!(set.get_str("voided_by").unwrap(), "bursar-1");
        assert!(set.contains_key("voided_at"));
    }

    #[test]
    fn guard_filter_lists_allowed_statuses() {
        let filter = status_filter(&PaymentStatus::SETTLEABLE).unwrap();
        let doc = filter.as_document().unwrap();
        let values = doc.get_array("$in").unwrap();
        assert_eq!(
            values,
            &vec![Bson::String("PENDING".into()), Bson::String("PROCESSING".into())]
        );
    }
}
