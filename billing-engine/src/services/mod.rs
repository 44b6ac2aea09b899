//! Core billing services.

pub mod audit;
pub mod biller;
pub mod disputes;
pub mod ledger;
pub mod metrics;
pub mod payments;
pub mod pricing;

pub use audit::AuditRecorder;
pub use biller::SubscriptionBiller;
pub use disputes::{DisputeManager, DisputeParty, DisputeResolution};
pub use ledger::InvoiceLedger;
pub use payments::PaymentProcessor;
pub use pricing::PricingEngine;
