//! Persistence layer: the `BillingStore` repository trait and its adapters.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::models::{
    AuditEntry, BillingDispute, CustomerCredit, Invoice, Payment, PricingTier, Subscription,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use engine_core::error::AppError;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Repository interface over the billing entities.
///
/// Methods that change state take the `AuditEntry` describing the change and
/// persist both atomically: the mutation and its audit row commit together or
/// not at all. Invoice writes are compare-and-swap on `Invoice::version`;
/// a lost race surfaces as `AppError::Conflict`.
#[async_trait]
pub trait BillingStore: Send + Sync {
    // Invoices
    async fn insert_invoice(&self, invoice: &Invoice, audit: &AuditEntry) -> Result<(), AppError>;
    async fn find_invoice(&self, invoice_number: &str) -> Result<Option<Invoice>, AppError>;
    async fn update_invoice(&self, invoice: &Invoice, audit: &AuditEntry) -> Result<(), AppError>;
    async fn find_overdue_invoices(&self, as_of: NaiveDate) -> Result<Vec<Invoice>, AppError>;

    /// Write the settled invoice (version-checked), the payment row, and the
    /// audit row in one transaction.
    async fn record_settlement(
        &self,
        invoice: &Invoice,
        payment: &Payment,
        audit: &AuditEntry,
    ) -> Result<(), AppError>;

    // Payments
    async fn insert_payment(&self, payment: &Payment, audit: &AuditEntry) -> Result<(), AppError>;
    async fn find_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, AppError>;
    /// All payments for an invoice, most recent first.
    async fn payments_for_invoice(&self, invoice_number: &str) -> Result<Vec<Payment>, AppError>;

    // Pricing tiers (administered outside the engine's write path)
    async fn insert_tier(&self, tier: &PricingTier) -> Result<(), AppError>;
    async fn list_tiers(&self) -> Result<Vec<PricingTier>, AppError>;

    // Subscriptions
    async fn insert_subscription(&self, subscription: &Subscription) -> Result<(), AppError>;
    async fn find_due_subscriptions(&self, as_of: NaiveDate) -> Result<Vec<Subscription>, AppError>;
    async fn advance_subscription(
        &self,
        subscription_id: Uuid,
        next_billing_date: NaiveDate,
    ) -> Result<(), AppError>;

    // Disputes
    async fn insert_dispute(
        &self,
        dispute: &BillingDispute,
        audit: &AuditEntry,
    ) -> Result<(), AppError>;
    async fn find_dispute(&self, dispute_id: Uuid) -> Result<Option<BillingDispute>, AppError>;
    async fn update_dispute(
        &self,
        dispute: &BillingDispute,
        audit: &AuditEntry,
    ) -> Result<(), AppError>;
    /// Write the resolved dispute and add `amount` to the customer's credit
    /// balance in one transaction, creating the balance on first credit.
    /// The delta is applied inside the store so two concurrent resolutions
    /// cannot lose each other's credit. A balance held in another currency
    /// rejects the resolution with `BadRequest`.
    async fn resolve_with_credit(
        &self,
        dispute: &BillingDispute,
        currency: &str,
        amount: Decimal,
        audit: &AuditEntry,
    ) -> Result<CustomerCredit, AppError>;
    /// Write the resolved dispute, the refund payment row, and both audit
    /// rows in one transaction.
    async fn resolve_with_refund(
        &self,
        dispute: &BillingDispute,
        refund: &Payment,
        refund_audit: &AuditEntry,
        audit: &AuditEntry,
    ) -> Result<(), AppError>;
    async fn find_disputes_due_for_review(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<BillingDispute>, AppError>;

    // Credits
    async fn find_credit(&self, customer_id: Uuid) -> Result<Option<CustomerCredit>, AppError>;

    // Audit trail
    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), AppError>;
    async fn audit_trail(&self, entity_id: &str) -> Result<Vec<AuditEntry>, AppError>;
}
