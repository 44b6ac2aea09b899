//! Dispute lifecycle and resolution.

use crate::models::{
    AuditEntityType, AuditEntry, BillingDispute, DisputeStatus, InvoiceStatus,
    generate_dispute_number,
};
use crate::services::ledger::InvoiceLedger;
use crate::services::metrics;
use crate::services::payments::PaymentProcessor;
use crate::store::BillingStore;
use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use engine_core::config::BillingConfig;
use engine_core::error::AppError;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Party a dispute is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisputeParty {
    Customer,
    Internal,
}

/// Terminal outcome of a dispute.
#[derive(Debug, Clone)]
pub enum DisputeResolution {
    /// Customer wins; the amount is added to their credit balance.
    CustomerFavorCredit { amount: Decimal, note: String },
    /// Customer wins; the amount is refunded against an earlier payment.
    CustomerFavorRefund {
        payment_id: Uuid,
        amount: Decimal,
        note: String,
    },
    /// Charge stands.
    MerchantFavor { note: String },
    /// Closed without a finding, e.g. withdrawn by the customer.
    Close { note: String },
}

/// Opens, tracks, and resolves billing disputes.
#[derive(Clone)]
pub struct DisputeManager {
    store: Arc<dyn BillingStore>,
    ledger: InvoiceLedger,
    payments: PaymentProcessor,
    config: BillingConfig,
}

impl DisputeManager {
    pub fn new(
        store: Arc<dyn BillingStore>,
        ledger: InvoiceLedger,
        payments: PaymentProcessor,
        config: BillingConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            payments,
            config,
        }
    }

    /// Open a dispute against an issued invoice. Draft invoices cannot be
    /// disputed; the customer has never seen them.
    #[instrument(skip(self, reason))]
    pub async fn open_dispute(
        &self,
        invoice_number: &str,
        reason: &str,
        customer_id: Uuid,
        performed_by: &str,
    ) -> Result<BillingDispute, AppError> {
        if reason.trim().is_empty() {
            return Err(AppError::BadRequest(anyhow!(
                "Dispute reason cannot be empty"
            )));
        }

        let invoice = self.ledger.get_invoice(invoice_number).await?;
        if invoice.status() == InvoiceStatus::Draft {
            return Err(AppError::InvalidState(anyhow!(
                "Invoice {} is still draft and cannot be disputed",
                invoice_number
            )));
        }

        let now = Utc::now();
        let dispute = BillingDispute {
            dispute_id: Uuid::new_v4(),
            dispute_number: generate_dispute_number(now),
            customer_id,
            invoice_number: invoice.invoice_number.clone(),
            reason: reason.to_string(),
            status: DisputeStatus::UnderReview.as_str().to_string(),
            due_date: now + Duration::days(self.config.dispute_review_days),
            created_utc: now,
            resolved_utc: None,
            resolution_amount: None,
            resolution_note: None,
        };

        let audit = AuditEntry::new(
            AuditEntityType::Dispute,
            &dispute.dispute_number,
            "dispute_opened",
            serde_json::json!({
                "invoice_number": invoice.invoice_number,
                "customer_id": customer_id,
                "reason": reason,
            })
            .to_string(),
            performed_by,
        );
        self.store.insert_dispute(&dispute, &audit).await?;

        metrics::DISPUTES_TOTAL
            .with_label_values(&[dispute.status.as_str()])
            .inc();

        info!(
            dispute_number = %dispute.dispute_number,
            invoice_number = %invoice.invoice_number,
            "Dispute opened"
        );
        Ok(dispute)
    }

    pub async fn get_dispute(&self, dispute_id: Uuid) -> Result<BillingDispute, AppError> {
        self.store
            .find_dispute(dispute_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("Dispute {} not found", dispute_id)))
    }

    /// Move a dispute under review into a waiting state and restart its
    /// review clock.
    #[instrument(skip(self))]
    pub async fn request_response(
        &self,
        dispute_id: Uuid,
        party: DisputeParty,
        performed_by: &str,
    ) -> Result<BillingDispute, AppError> {
        let mut dispute = self.get_dispute(dispute_id).await?;
        if dispute.status() != DisputeStatus::UnderReview {
            return Err(AppError::InvalidState(anyhow!(
                "Dispute {} is not under review (status '{}')",
                dispute.dispute_number,
                dispute.status
            )));
        }

        let next = match party {
            DisputeParty::Customer => DisputeStatus::AwaitingCustomerResponse,
            DisputeParty::Internal => DisputeStatus::AwaitingInternalResponse,
        };
        dispute.status = next.as_str().to_string();
        dispute.due_date = Utc::now() + Duration::days(self.config.dispute_review_days);

        let audit = AuditEntry::new(
            AuditEntityType::Dispute,
            &dispute.dispute_number,
            "dispute_response_requested",
            serde_json::json!({ "status": dispute.status, "due_date": dispute.due_date })
                .to_string(),
            performed_by,
        );
        self.store.update_dispute(&dispute, &audit).await?;

        metrics::DISPUTES_TOTAL
            .with_label_values(&[dispute.status.as_str()])
            .inc();
        Ok(dispute)
    }

    /// Resolve an open dispute.
    ///
    /// Customer-favor outcomes move money: the credit balance grows or a
    /// refund row is written, in either case atomically with the dispute
    /// write. A failed resolution leaves no money moved.
    #[instrument(skip(self, resolution))]
    pub async fn resolve_dispute(
        &self,
        dispute_id: Uuid,
        resolution: DisputeResolution,
        performed_by: &str,
    ) -> Result<BillingDispute, AppError> {
        let mut dispute = self.get_dispute(dispute_id).await?;
        if dispute.status().is_terminal() {
            return Err(AppError::InvalidState(anyhow!(
                "Dispute {} is already resolved (status '{}')",
                dispute.dispute_number,
                dispute.status
            )));
        }

        let now = Utc::now();
        dispute.resolved_utc = Some(now);

        match resolution {
            DisputeResolution::CustomerFavorCredit { amount, note } => {
                if amount <= Decimal::ZERO {
                    return Err(AppError::BadRequest(anyhow!(
                        "Credit amount must be positive"
                    )));
                }
                let invoice = self.ledger.get_invoice(&dispute.invoice_number).await?;

                dispute.status = DisputeStatus::ResolvedCustomerFavor.as_str().to_string();
                dispute.resolution_amount = Some(amount);
                dispute.resolution_note = Some(note);

                let audit = AuditEntry::new(
                    AuditEntityType::Dispute,
                    &dispute.dispute_number,
                    "dispute_resolved_customer_favor",
                    serde_json::json!({
                        "invoice_number": dispute.invoice_number,
                        "credit_amount": amount,
                        "currency": invoice.currency,
                    })
                    .to_string(),
                    performed_by,
                );
                // The store applies the balance delta; concurrent credits to
                // one customer both land.
                self.store
                    .resolve_with_credit(&dispute, &invoice.currency, amount, &audit)
                    .await?;
            }
            DisputeResolution::CustomerFavorRefund {
                payment_id,
                amount,
                note,
            } => {
                let (refund, refund_audit) = self
                    .payments
                    .prepare_refund(
                        payment_id,
                        amount,
                        Some(format!("Dispute {}", dispute.dispute_number)),
                        performed_by,
                    )
                    .await?;

                dispute.status = DisputeStatus::ResolvedCustomerFavor.as_str().to_string();
                dispute.resolution_amount = Some(amount);
                dispute.resolution_note = Some(note);

                let audit = AuditEntry::new(
                    AuditEntityType::Dispute,
                    &dispute.dispute_number,
                    "dispute_resolved_customer_favor",
                    serde_json::json!({
                        "invoice_number": dispute.invoice_number,
                        "refunded_payment_id": payment_id,
                        "refund_amount": amount,
                    })
                    .to_string(),
                    performed_by,
                );
                self.store
                    .resolve_with_refund(&dispute, &refund, &refund_audit, &audit)
                    .await?;

                metrics::PAYMENTS_TOTAL
                    .with_label_values(&[refund.method.as_str(), refund.status.as_str()])
                    .inc();
            }
            DisputeResolution::MerchantFavor { note } => {
                dispute.status = DisputeStatus::ResolvedMerchantFavor.as_str().to_string();
                dispute.resolution_note = Some(note);

                let audit = AuditEntry::new(
                    AuditEntityType::Dispute,
                    &dispute.dispute_number,
                    "dispute_resolved_merchant_favor",
                    serde_json::json!({ "invoice_number": dispute.invoice_number }).to_string(),
                    performed_by,
                );
                self.store.update_dispute(&dispute, &audit).await?;
            }
            DisputeResolution::Close { note } => {
                dispute.status = DisputeStatus::ClosedNoResolution.as_str().to_string();
                dispute.resolution_note = Some(note);

                let audit = AuditEntry::new(
                    AuditEntityType::Dispute,
                    &dispute.dispute_number,
                    "dispute_closed",
                    serde_json::json!({ "invoice_number": dispute.invoice_number }).to_string(),
                    performed_by,
                );
                self.store.update_dispute(&dispute, &audit).await?;
            }
        }

        metrics::DISPUTES_TOTAL
            .with_label_values(&[dispute.status.as_str()])
            .inc();

        info!(
            dispute_number = %dispute.dispute_number,
            status = %dispute.status,
            "Dispute resolved"
        );
        Ok(dispute)
    }

    /// Non-terminal disputes whose action deadline has passed. Consumed by
    /// an external scheduler.
    #[instrument(skip(self))]
    pub async fn find_disputes_due_for_review(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<BillingDispute>, AppError> {
        self.store.find_disputes_due_for_review(as_of).await
    }

    /// Current credit balance for a customer, zero if none has been issued.
    pub async fn credit_balance(&self, customer_id: Uuid) -> Result<Decimal, AppError> {
        Ok(self
            .store
            .find_credit(customer_id)
            .await?
            .map(|c| c.balance)
            .unwrap_or(Decimal::ZERO))
    }
}
