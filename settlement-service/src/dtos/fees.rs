use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use validator::Validate;

use super::{percentage, positive_amount};
use crate::models::{CreateFeeTemplate, UpdateFeeTemplate};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateFeeTemplateRequest {
    #[validate(length(min = 1, max = 120, message = "name is required"))]
    pub name: String,
    #[validate(custom(function = "positive_amount"))]
    pub amount: Decimal,
    #[validate(length(min = 1, message = "applicable_grade is required"))]
    pub applicable_grade: String,
    #[validate(length(min = 1, message = "billing_period_id is required"))]
    pub billing_period_id: String,
}

impl From<CreateFeeTemplateRequest> for CreateFeeTemplate {
    fn from(req: CreateFeeTemplateRequest) -> Self {
        Self {
            name: req.name,
            amount: req.amount,
            applicable_grade: req.applicable_grade,
            billing_period_id: req.billing_period_id,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateFeeTemplateRequest {
    #[validate(length(min = 1, max = 120))]
    pub name: Option<String>,
    #[validate(custom(function = "positive_amount"))]
    pub amount: Option<Decimal>,
    #[validate(length(min = 1))]
    pub applicable_grade: Option<String>,
    #[validate(length(min = 1))]
    pub billing_period_id: Option<String>,
}

impl From<UpdateFeeTemplateRequest> for UpdateFeeTemplate {
    fn from(req: UpdateFeeTemplateRequest) -> Self {
        Self {
            name: req.name,
            amount: req.amount,
            applicable_grade: req.applicable_grade,
            billing_period_id: req.billing_period_id,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateScholarshipRequest {
    #[validate(length(min = 1, max = 120, message = "name is required"))]
    pub name: String,
    #[validate(custom(function = "percentage"))]
    pub discount_percentage: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AssignFeeRequest {
    #[validate(length(min = 1, message = "fee_template_id is required"))]
    pub fee_template_id: String,
    #[validate(length(min = 1, message = "class_id is required"))]
    pub class_id: String,
    pub due_date: Option<NaiveDate>,
}
