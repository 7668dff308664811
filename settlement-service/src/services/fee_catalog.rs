//! Fee templates and scholarships.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use super::store::{SettlementStore, StoreError};
use super::require_staff;
use crate::error::{SettlementError, SettlementResult};
use crate::models::{Actor, CreateFeeTemplate, FeeTemplate, Scholarship, UpdateFeeTemplate};

#[derive(Clone)]
pub struct FeeCatalog {
    store: Arc<dyn SettlementStore>,
}

fn validate_amount(amount: Decimal) -> SettlementResult<()> {
    if amount <= Decimal::ZERO {
        return Err(SettlementError::Validation(
            "fee amount must be greater than zero".into(),
        ));
    }
    Ok(())
}

impl FeeCatalog {
    pub fn new(store: Arc<dyn SettlementStore>) -> Self {
        Self { store }
    }

    pub async fn create_fee_template(
        &self,
        tenant_id: &str,
        actor: &Actor,
        input: CreateFeeTemplate,
    ) -> SettlementResult<FeeTemplate> {
        require_staff(actor)?;
        validate_amount(input.amount)?;

        let now = Utc::now();
        let template = FeeTemplate {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            name: input.name,
            amount: input.amount,
            applicable_grade: input.applicable_grade,
            billing_period_id: input.billing_period_id,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_fee_template(&template).await?;

        tracing::info!(
            tenant_id = %tenant_id,
            fee_template_id = %template.id,
            amount = %template.amount,
            "Fee template created"
        );
        Ok(template)
    }

    pub async fn get_fee_template(&self, tenant_id: &str, id: &str) -> SettlementResult<FeeTemplate> {
        self.store
            .get_fee_template(tenant_id, id)
            .await?
            .ok_or_else(|| SettlementError::not_found("fee template", id))
    }

    pub async fn list_fee_templates(&self, tenant_id: &str) -> SettlementResult<Vec<FeeTemplate>> {
        Ok(self.store.list_fee_templates(tenant_id).await?)
    }

    /// Templates freeze once any obligation built from them has money against it.
    pub async fn update_fee_template(
        &self,
        tenant_id: &str,
        actor: &Actor,
        id: &str,
        changes: UpdateFeeTemplate,
    ) -> SettlementResult<FeeTemplate> {
        require_staff(actor)?;
        if let Some(amount) = changes.amount {
            validate_amount(amount)?;
        }

        let mut template = self.get_fee_template(tenant_id, id).await?;
        let obligations = self.store.list_template_obligations(tenant_id, id).await?;
        if obligations.iter().any(|o| o.amount_paid > Decimal::ZERO) {
            return Err(SettlementError::Conflict(
                "fee template has recorded payments and can no longer be edited".into(),
            ));
        }

        if let Some(name) = changes.name {
            template.name = name;
        }
        if let Some(amount) = changes.amount {
            template.amount = amount;
        }
        if let Some(grade) = changes.applicable_grade {
            template.applicable_grade = grade;
        }
        if let Some(period) = changes.billing_period_id {
            template.billing_period_id = period;
        }
        template.updated_at = Utc::now();

        if !self.store.update_fee_template(&template).await? {
            return Err(SettlementError::not_found("fee template", id));
        }
        tracing::info!(tenant_id = %tenant_id, fee_template_id = %id, "Fee template updated");
        Ok(template)
    }

    pub async fn delete_fee_template(
        &self,
        tenant_id: &str,
        actor: &Actor,
        id: &str,
    ) -> SettlementResult<()> {
        require_staff(actor)?;
        self.get_fee_template(tenant_id, id).await?;

        let referenced = self.store.list_template_obligations(tenant_id, id).await?;
        if !referenced.is_empty() {
            return Err(SettlementError::Conflict(format!(
                "fee template is assigned to {} student(s)",
                referenced.len()
            )));
        }

        if !self.store.delete_fee_template(tenant_id, id).await? {
            return Err(SettlementError::not_found("fee template", id));
        }
        tracing::info!(tenant_id = %tenant_id, fee_template_id = %id, "Fee template deleted");
        Ok(())
    }

    pub async fn create_scholarship(
        &self,
        tenant_id: &str,
        actor: &Actor,
        name: String,
        discount_percentage: Decimal,
    ) -> SettlementResult<Scholarship> {
        require_staff(actor)?;
        if discount_percentage < Decimal::ZERO || discount_percentage > Decimal::ONE_HUNDRED {
            return Err(SettlementError::Validation(
                "discount percentage must be between 0 and 100".into(),
            ));
        }

        let scholarship = Scholarship {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            name,
            discount_percentage,
            created_at: Utc::now(),
        };
        self.store
            .insert_scholarship(&scholarship)
            .await
            .map_err(|e| match e {
                StoreError::Duplicate(_) => SettlementError::Conflict("scholarship already exists".into()),
                other => other.into(),
            })?;
        Ok(scholarship)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActorRole;
    use crate::services::memory::InMemorySettlementStore;
    use rust_decimal_macros::dec;

    fn catalog() -> FeeCatalog {
        FeeCatalog::new(Arc::new(InMemorySettlementStore::new()))
    }

    fn bursar() -> Actor {
        Actor::new("bursar-1", None, ActorRole::Bursar)
    }

    fn tuition() -> CreateFeeTemplate {
        CreateFeeTemplate {
            name: "Tuition".into(),
            amount: dec!(1000),
            applicable_grade: "Form 1".into(),
            billing_period_id: "2026-T1".into(),
        }
    }

    #[tokio::test]
    async fn guardians_cannot_manage_the_catalog() {
        let guardian = Actor::new("g1", None, ActorRole::Guardian);
        let err = catalog()
            .create_fee_template("t1", &guardian, tuition())
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn rejects_non_positive_amounts() {
        let mut input = tuition();
        input.amount = Decimal::ZERO;
        let err = catalog()
            .create_fee_template("t1", &bursar(), input)
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::Validation(_)));
    }

    #[tokio::test]
    async fn templates_are_tenant_scoped() {
        let catalog = catalog();
        let template = catalog
            .create_fee_template("t1", &bursar(), tuition())
            .await
            .unwrap();

        assert!(catalog.get_fee_template("t1", &template.id).await.is_ok());
        assert!(matches!(
            catalog.get_fee_template("t2", &template.id).await,
            Err(SettlementError::NotFound { .. })
        ));
        assert!(catalog.list_fee_templates("t2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scholarship_percentage_is_bounded() {
        let err = catalog()
            .create_scholarship("t1", &bursar(), "Merit".into(), dec!(101))
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::Validation(_)));
    }
}
