pub mod actor;
pub mod fee;
pub mod payment;
pub mod reference;
pub mod subscription;

pub use actor::{Actor, ActorRole};
pub use fee::{
    CreateFeeTemplate, FeeObligation, FeeTemplate, Scholarship, StudentRecord, UpdateFeeTemplate,
};
pub use payment::{
    MobileOperator, Payment, PaymentFilter, PaymentMethod, PaymentStatus, PaymentTransition,
};
pub use reference::{ReferenceError, ReferenceKind};
pub use subscription::{
    BillingCycle, SubscriptionPayment, SubscriptionPaymentStatus, SubscriptionPlan,
    SubscriptionTier, SubscriptionTransition, TenantStatus, TenantSubscription,
};
