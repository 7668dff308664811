//! Discount resolver: turns a template amount into a student's amount due.

use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;

use super::store::SettlementStore;
use crate::error::{SettlementError, SettlementResult};
use crate::models::{FeeTemplate, Scholarship, StudentRecord};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// `amount × (1 − pct/100)`, rounded to cents (half away from zero) and
/// floored at zero. No scholarship leaves the amount untouched.
pub fn discounted_amount(amount: Decimal, discount_percentage: Option<Decimal>) -> Decimal {
    let Some(pct) = discount_percentage else {
        return amount;
    };
    let due = amount * (Decimal::ONE - pct / HUNDRED);
    due.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .max(Decimal::ZERO)
}

#[derive(Clone)]
pub struct DiscountResolver {
    store: Arc<dyn SettlementStore>,
}

impl DiscountResolver {
    pub fn new(store: Arc<dyn SettlementStore>) -> Self {
        Self { store }
    }

    /// A student pointing at a scholarship that no longer exists is an error
    /// for that student, not a silent full-price charge.
    pub async fn scholarship_for(
        &self,
        student: &StudentRecord,
    ) -> SettlementResult<Option<Scholarship>> {
        let Some(scholarship_id) = student.scholarship_id.as_deref() else {
            return Ok(None);
        };
        self.store
            .get_scholarship(&student.tenant_id, scholarship_id)
            .await?
            .map(Some)
            .ok_or_else(|| SettlementError::not_found("scholarship", scholarship_id))
    }

    pub async fn amount_due(
        &self,
        template: &FeeTemplate,
        student: &StudentRecord,
    ) -> SettlementResult<Decimal> {
        let scholarship = self.scholarship_for(student).await?;
        Ok(discounted_amount(
            template.amount,
            scholarship.map(|s| s.discount_percentage),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn twenty_percent_scholarship_on_a_thousand() {
        assert_eq!(discounted_amount(dec!(1000), Some(dec!(20))), dec!(800));
        assert_eq!(discounted_amount(dec!(1000), None), dec!(1000));
    }

    #[test]
    fn full_and_excessive_discounts_floor_at_zero() {
        assert_eq!(discounted_amount(dec!(750), Some(dec!(100))), Decimal::ZERO);
        assert_eq!(discounted_amount(dec!(750), Some(dec!(120))), Decimal::ZERO);
    }

    #[test]
    fn rounds_half_cents_away_from_zero() {
        // 33.33 * 0.85 = 28.3305
        assert_eq!(discounted_amount(dec!(33.33), Some(dec!(15))), dec!(28.33));
        // 0.05 * 0.5 = 0.025
        assert_eq!(discounted_amount(dec!(0.05), Some(dec!(50))), dec!(0.03));
    }
}
