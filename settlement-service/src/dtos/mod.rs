pub mod fees;
pub mod payments;
pub mod subscriptions;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

pub use fees::*;
pub use payments::*;
pub use subscriptions::*;

pub const DEFAULT_PAGE_SIZE: u64 = 20;

#[derive(Debug, Deserialize, Validate, Default)]
pub struct PageQuery {
    #[validate(range(min = 1, message = "page starts at 1"))]
    pub page: Option<u64>,
    #[validate(range(min = 1, max = 100, message = "page_size must be between 1 and 100"))]
    pub page_size: Option<u64>,
}

impl PageQuery {
    pub fn page(&self) -> u64 {
        self.page.unwrap_or(1)
    }

    pub fn page_size(&self) -> u64 {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn offset(&self) -> u64 {
        (self.page() - 1) * self.page_size()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

pub(crate) fn positive_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount > Decimal::ZERO {
        Ok(())
    } else {
        Err(ValidationError::new("amount_must_be_positive"))
    }
}

pub(crate) fn percentage(value: &Decimal) -> Result<(), ValidationError> {
    if *value >= Decimal::ZERO && *value <= Decimal::ONE_HUNDRED {
        Ok(())
    } else {
        Err(ValidationError::new("percentage_out_of_range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_query_defaults_and_offset() {
        let q = PageQuery::default();
        assert_eq!((q.page(), q.page_size(), q.offset()), (1, 20, 0));

        let q = PageQuery {
            page: Some(3),
            page_size: Some(10),
        };
        assert_eq!(q.offset(), 20);
    }

    #[test]
    fn page_size_is_capped() {
        let q = PageQuery {
            page: Some(1),
            page_size: Some(500),
        };
        assert!(q.validate().is_err());
    }
}
