//! Fee catalog, scholarships and per-student fee obligations.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Reusable definition of an amount owed, scoped to a grade and billing period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeTemplate {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub amount: Decimal,
    pub applicable_grade: String,
    pub billing_period_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateFeeTemplate {
    pub name: String,
    pub amount: Decimal,
    pub applicable_grade: String,
    pub billing_period_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateFeeTemplate {
    pub name: Option<String>,
    pub amount: Option<Decimal>,
    pub applicable_grade: Option<String>,
    pub billing_period_id: Option<String>,
}

/// Percentage discount applied to a student's fee obligations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scholarship {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    /// 0 to 100 inclusive.
    pub discount_percentage: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Per-student instantiation of a fee template, after discount.
///
/// Unique per `(student_id, fee_template_id)`. `amount_paid` is only ever
/// advanced by settled payments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeObligation {
    pub id: String,
    pub tenant_id: String,
    pub student_id: String,
    pub fee_template_id: String,
    pub amount_due: Decimal,
    pub amount_paid: Decimal,
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FeeObligation {
    /// Portion of `amount_due` not yet covered by allocated payments.
    pub fn remaining(&self) -> Decimal {
        (self.amount_due - self.amount_paid).max(Decimal::ZERO)
    }
}

/// Read-only view of a student record, owned by the student records module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub id: String,
    pub tenant_id: String,
    pub class_id: String,
    pub full_name: String,
    pub active: bool,
    pub scholarship_id: Option<String>,
    /// Users explicitly linked to this student as guardians.
    #[serde(default)]
    pub guardian_ids: Vec<String>,
    /// Contact e-mail registered for the student's guardian.
    pub guardian_email: Option<String>,
}
