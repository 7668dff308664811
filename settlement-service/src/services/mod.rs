pub mod balance;
pub mod discount;
pub mod fee_assignment;
pub mod fee_catalog;
pub mod gateway;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod notifier;
pub mod reconciler;
pub mod repository;
pub mod store;
pub mod subscription;

pub use balance::BalanceAggregator;
pub use discount::DiscountResolver;
pub use fee_assignment::{AssignmentReport, FeeAssignmentEngine};
pub use fee_catalog::FeeCatalog;
pub use gateway::{CollectionGateway, MobileMoneyClient, MockGateway};
pub use ledger::PaymentLedger;
pub use memory::InMemorySettlementStore;
pub use notifier::{NotificationEvent, NotificationQueue, NotificationSender};
pub use reconciler::WebhookReconciler;
pub use repository::MongoSettlementStore;
pub use store::{SettlementStore, StoreError};
pub use subscription::SubscriptionBilling;

use crate::error::{SettlementError, SettlementResult};
use crate::models::Actor;

pub(crate) fn require_staff(actor: &Actor) -> SettlementResult<()> {
    if actor.is_staff() {
        Ok(())
    } else {
        Err(SettlementError::Unauthorized(
            "this action requires an administrator or bursar".into(),
        ))
    }
}

pub(crate) fn require_admin(actor: &Actor) -> SettlementResult<()> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(SettlementError::Unauthorized(
            "this action requires an administrator".into(),
        ))
    }
}
