use rust_decimal::Decimal;
use serde::Deserialize;
use validator::Validate;

use super::{positive_amount, PageQuery};
use crate::models::{MobileOperator, PaymentFilter, PaymentMethod, PaymentStatus};
use crate::services::ledger::CreatePayment;

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    #[validate(length(min = 1, message = "student_id is required"))]
    pub student_id: String,
    #[validate(custom(function = "positive_amount"))]
    pub amount: Decimal,
    pub method: PaymentMethod,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
    pub operator: Option<MobileOperator>,
    #[validate(length(min = 8, max = 16))]
    pub phone_number: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub transaction_id: Option<String>,
}

impl From<CreatePaymentRequest> for CreatePayment {
    fn from(req: CreatePaymentRequest) -> Self {
        Self {
            student_id: req.student_id,
            amount: req.amount,
            method: req.method,
            notes: req.notes,
            operator: req.operator,
            phone_number: req.phone_number,
            transaction_id: req.transaction_id,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct VoidPaymentRequest {
    #[validate(length(min = 1, max = 500, message = "reason is required"))]
    pub reason: String,
}

#[derive(Debug, Deserialize, Validate, Default)]
pub struct ListPaymentsQuery {
    pub student_id: Option<String>,
    pub status: Option<PaymentStatus>,
    pub method: Option<PaymentMethod>,
    #[validate(range(min = 1))]
    pub page: Option<u64>,
    #[validate(range(min = 1, max = 100))]
    pub page_size: Option<u64>,
}

impl ListPaymentsQuery {
    pub fn paging(&self) -> PageQuery {
        PageQuery {
            page: self.page,
            page_size: self.page_size,
        }
    }

    pub fn filter(&self) -> PaymentFilter {
        let paging = self.paging();
        PaymentFilter {
            student_id: self.student_id.clone(),
            status: self.status,
            method: self.method,
            limit: paging.page_size(),
            offset: paging.offset(),
        }
    }
}
