//! Data model for the billing engine.

pub mod audit;
pub mod billing_run;
pub mod credit;
pub mod dispute;
pub mod invoice;
pub mod payment;
pub mod subscription;
pub mod tier;

pub use audit::{AuditEntityType, AuditEntry};
pub use billing_run::{BillingFailure, BillingRunReport};
pub use credit::CustomerCredit;
pub use dispute::{generate_dispute_number, BillingDispute, DisputeStatus};
pub use invoice::{
    generate_invoice_number, ChargeAmounts, ChargeRequest, CreateInvoiceRequest, Invoice,
    InvoiceStatus, InvoiceType, ServiceType, UpdateInvoiceFields,
};
pub use payment::{generate_payment_reference, Payment, PaymentMethod, PaymentStatus};
pub use subscription::{BillingInterval, Subscription, SubscriptionStatus};
pub use tier::PricingTier;
