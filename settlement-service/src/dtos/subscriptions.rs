use serde::Deserialize;
use validator::Validate;

use crate::models::{BillingCycle, MobileOperator};

#[derive(Debug, Deserialize, Validate)]
pub struct UpgradeSubscriptionRequest {
    #[validate(length(min = 1, message = "plan_id is required"))]
    pub plan_id: String,
    pub billing_cycle: BillingCycle,
}

#[derive(Debug, Deserialize, Validate)]
pub struct MobileMoneySubscriptionRequest {
    #[validate(length(min = 1, message = "plan_id is required"))]
    pub plan_id: String,
    pub billing_cycle: BillingCycle,
    #[validate(length(min = 8, max = 16, message = "phone_number is required"))]
    pub phone_number: String,
    pub operator: MobileOperator,
}
