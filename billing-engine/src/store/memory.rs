//! In-memory `BillingStore` used by the test suite and for embedded runs.
//!
//! All state sits behind a single mutex, so the compound methods are atomic
//! by construction. `fail_next_audit` lets tests force an audit write
//! failure and assert that the enclosing mutation does not commit.

use super::BillingStore;
use crate::models::{
    AuditEntry, BillingDispute, CustomerCredit, Invoice, InvoiceStatus, Payment, PricingTier,
    Subscription,
};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use engine_core::error::AppError;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    invoices: HashMap<String, Invoice>,
    payments: Vec<Payment>,
    tiers: Vec<PricingTier>,
    subscriptions: HashMap<Uuid, Subscription>,
    disputes: HashMap<Uuid, BillingDispute>,
    credits: HashMap<Uuid, CustomerCredit>,
    audits: Vec<AuditEntry>,
    fail_next_audit: bool,
}

impl MemoryState {
    fn take_audit_failure(&mut self) -> Result<(), AppError> {
        if self.fail_next_audit {
            self.fail_next_audit = false;
            return Err(AppError::AuditPersistence(anyhow!(
                "injected audit write failure"
            )));
        }
        Ok(())
    }

    fn check_invoice_version(&self, invoice: &Invoice) -> Result<(), AppError> {
        let existing = self
            .invoices
            .get(&invoice.invoice_number)
            .ok_or_else(|| AppError::NotFound(anyhow!("Invoice {} not found", invoice.invoice_number)))?;
        if existing.version + 1 != invoice.version {
            return Err(AppError::Conflict(anyhow!(
                "Invoice {} was modified concurrently (expected version {}, found {})",
                invoice.invoice_number,
                invoice.version - 1,
                existing.version
            )));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next audit-taking write fail with `AuditPersistence`,
    /// leaving all entities untouched. Test hook.
    pub async fn fail_next_audit(&self) {
        self.state.lock().await.fail_next_audit = true;
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn insert_invoice(&self, invoice: &Invoice, audit: &AuditEntry) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        state.take_audit_failure()?;
        if state.invoices.contains_key(&invoice.invoice_number) {
            return Err(AppError::Conflict(anyhow!(
                "Invoice number {} already exists",
                invoice.invoice_number
            )));
        }
        state
            .invoices
            .insert(invoice.invoice_number.clone(), invoice.clone());
        state.audits.push(audit.clone());
        Ok(())
    }

    async fn find_invoice(&self, invoice_number: &str) -> Result<Option<Invoice>, AppError> {
        let state = self.state.lock().await;
        Ok(state.invoices.get(invoice_number).cloned())
    }

    async fn update_invoice(&self, invoice: &Invoice, audit: &AuditEntry) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        state.take_audit_failure()?;
        state.check_invoice_version(invoice)?;
        state
            .invoices
            .insert(invoice.invoice_number.clone(), invoice.clone());
        state.audits.push(audit.clone());
        Ok(())
    }

    async fn find_overdue_invoices(&self, as_of: NaiveDate) -> Result<Vec<Invoice>, AppError> {
        let state = self.state.lock().await;
        let mut overdue: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|inv| {
                matches!(
                    inv.status(),
                    InvoiceStatus::Sent | InvoiceStatus::PartiallyPaid
                ) && inv.due_date < as_of
            })
            .cloned()
            .collect();
        overdue.sort_by(|a, b| a.due_date.cmp(&b.due_date));
        Ok(overdue)
    }

    async fn record_settlement(
        &self,
        invoice: &Invoice,
        payment: &Payment,
        audit: &AuditEntry,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        state.take_audit_failure()?;
        state.check_invoice_version(invoice)?;
        state
            .invoices
            .insert(invoice.invoice_number.clone(), invoice.clone());
        state.payments.push(payment.clone());
        state.audits.push(audit.clone());
        Ok(())
    }

    async fn insert_payment(&self, payment: &Payment, audit: &AuditEntry) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        state.take_audit_failure()?;
        if state.payments.iter().any(|p| p.payment_id == payment.payment_id) {
            return Err(AppError::Conflict(anyhow!(
                "Payment {} already exists",
                payment.payment_id
            )));
        }
        state.payments.push(payment.clone());
        state.audits.push(audit.clone());
        Ok(())
    }

    async fn find_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .find(|p| p.payment_id == payment_id)
            .cloned())
    }

    async fn payments_for_invoice(&self, invoice_number: &str) -> Result<Vec<Payment>, AppError> {
        let state = self.state.lock().await;
        let mut payments: Vec<Payment> = state
            .payments
            .iter()
            .filter(|p| p.invoice_number == invoice_number)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(payments)
    }

    async fn insert_tier(&self, tier: &PricingTier) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        if state.tiers.iter().any(|t| t.name == tier.name) {
            return Err(AppError::Conflict(anyhow!(
                "Pricing tier '{}' already exists",
                tier.name
            )));
        }
        state.tiers.push(tier.clone());
        Ok(())
    }

    async fn list_tiers(&self) -> Result<Vec<PricingTier>, AppError> {
        let state = self.state.lock().await;
        Ok(state.tiers.clone())
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        state
            .subscriptions
            .insert(subscription.subscription_id, subscription.clone());
        Ok(())
    }

    async fn find_due_subscriptions(
        &self,
        as_of: NaiveDate,
    ) -> Result<Vec<Subscription>, AppError> {
        let state = self.state.lock().await;
        let mut due: Vec<Subscription> = state
            .subscriptions
            .values()
            .filter(|s| s.is_due(as_of))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.next_billing_date.cmp(&b.next_billing_date));
        Ok(due)
    }

    async fn advance_subscription(
        &self,
        subscription_id: Uuid,
        next_billing_date: NaiveDate,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        let sub = state
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| AppError::NotFound(anyhow!("Subscription {} not found", subscription_id)))?;
        sub.next_billing_date = next_billing_date;
        sub.updated_utc = Utc::now();
        Ok(())
    }

    async fn insert_dispute(
        &self,
        dispute: &BillingDispute,
        audit: &AuditEntry,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        state.take_audit_failure()?;
        if state
            .disputes
            .values()
            .any(|d| d.dispute_number == dispute.dispute_number)
        {
            return Err(AppError::Conflict(anyhow!(
                "Dispute number {} already exists",
                dispute.dispute_number
            )));
        }
        state.disputes.insert(dispute.dispute_id, dispute.clone());
        state.audits.push(audit.clone());
        Ok(())
    }

    async fn find_dispute(&self, dispute_id: Uuid) -> Result<Option<BillingDispute>, AppError> {
        let state = self.state.lock().await;
        Ok(state.disputes.get(&dispute_id).cloned())
    }

    async fn update_dispute(
        &self,
        dispute: &BillingDispute,
        audit: &AuditEntry,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        state.take_audit_failure()?;
        if !state.disputes.contains_key(&dispute.dispute_id) {
            return Err(AppError::NotFound(anyhow!(
                "Dispute {} not found",
                dispute.dispute_id
            )));
        }
        state.disputes.insert(dispute.dispute_id, dispute.clone());
        state.audits.push(audit.clone());
        Ok(())
    }

    async fn resolve_with_credit(
        &self,
        dispute: &BillingDispute,
        currency: &str,
        amount: Decimal,
        audit: &AuditEntry,
    ) -> Result<CustomerCredit, AppError> {
        let mut state = self.state.lock().await;
        state.take_audit_failure()?;
        if !state.disputes.contains_key(&dispute.dispute_id) {
            return Err(AppError::NotFound(anyhow!(
                "Dispute {} not found",
                dispute.dispute_id
            )));
        }

        let now = Utc::now();
        let credit = state
            .credits
            .entry(dispute.customer_id)
            .or_insert_with(|| CustomerCredit::new(dispute.customer_id, currency, now));
        if credit.currency != currency {
            return Err(AppError::BadRequest(anyhow!(
                "Credit balance for customer {} is held in {}, not {}",
                dispute.customer_id,
                credit.currency,
                currency
            )));
        }
        credit.balance += amount;
        credit.updated_utc = now;
        let credit = credit.clone();

        state.disputes.insert(dispute.dispute_id, dispute.clone());
        state.audits.push(audit.clone());
        Ok(credit)
    }

    async fn resolve_with_refund(
        &self,
        dispute: &BillingDispute,
        refund: &Payment,
        refund_audit: &AuditEntry,
        audit: &AuditEntry,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        state.take_audit_failure()?;
        if !state.disputes.contains_key(&dispute.dispute_id) {
            return Err(AppError::NotFound(anyhow!(
                "Dispute {} not found",
                dispute.dispute_id
            )));
        }
        if state.payments.iter().any(|p| p.payment_id == refund.payment_id) {
            return Err(AppError::Conflict(anyhow!(
                "Payment {} already exists",
                refund.payment_id
            )));
        }
        state.disputes.insert(dispute.dispute_id, dispute.clone());
        state.payments.push(refund.clone());
        state.audits.push(refund_audit.clone());
        state.audits.push(audit.clone());
        Ok(())
    }

    async fn find_disputes_due_for_review(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<BillingDispute>, AppError> {
        let state = self.state.lock().await;
        let mut due: Vec<BillingDispute> = state
            .disputes
            .values()
            .filter(|d| !d.status().is_terminal() && d.due_date < as_of)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.due_date.cmp(&b.due_date));
        Ok(due)
    }

    async fn find_credit(&self, customer_id: Uuid) -> Result<Option<CustomerCredit>, AppError> {
        let state = self.state.lock().await;
        Ok(state.credits.get(&customer_id).cloned())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        state.take_audit_failure()?;
        state.audits.push(entry.clone());
        Ok(())
    }

    async fn audit_trail(&self, entity_id: &str) -> Result<Vec<AuditEntry>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .audits
            .iter()
            .filter(|a| a.entity_id == entity_id)
            .cloned()
            .collect())
    }
}
