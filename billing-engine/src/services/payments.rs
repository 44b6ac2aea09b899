//! Payment application, gateway charges, and refunds.

use crate::gateway::PaymentGateway;
use crate::models::{
    AuditEntityType, AuditEntry, Invoice, Payment, PaymentMethod, PaymentStatus,
    generate_payment_reference,
};
use crate::services::ledger::InvoiceLedger;
use crate::services::metrics;
use crate::store::BillingStore;
use anyhow::anyhow;
use chrono::Utc;
use engine_core::config::BillingConfig;
use engine_core::error::AppError;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Applies manual and gateway payments against invoices and records refunds.
///
/// The settlement arithmetic itself lives in the ledger; this component owns
/// payment-row construction, the gateway call with its timeout, and the
/// refund cap.
#[derive(Clone)]
pub struct PaymentProcessor {
    store: Arc<dyn BillingStore>,
    ledger: InvoiceLedger,
    gateway: Arc<dyn PaymentGateway>,
    config: BillingConfig,
}

impl PaymentProcessor {
    pub fn new(
        store: Arc<dyn BillingStore>,
        ledger: InvoiceLedger,
        gateway: Arc<dyn PaymentGateway>,
        config: BillingConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            gateway,
            config,
        }
    }

    fn check_amount(amount: Decimal) -> Result<(), AppError> {
        if amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow!(
                "Payment amount must be positive"
            )));
        }
        Ok(())
    }

    /// Record an operator-entered payment (bank transfer slip, cash desk)
    /// against an invoice. The payment carries the currency the money
    /// arrived in; a mismatch with the invoice is rejected before anything
    /// is written.
    #[instrument(skip(self, memo))]
    pub async fn record_manual_payment(
        &self,
        invoice_number: &str,
        amount: Decimal,
        currency: &str,
        method: PaymentMethod,
        memo: Option<String>,
        performed_by: &str,
    ) -> Result<(Invoice, Payment), AppError> {
        Self::check_amount(amount)?;

        let invoice = self.ledger.get_invoice(invoice_number).await?;
        let now = Utc::now();
        let payment = Payment {
            payment_id: Uuid::new_v4(),
            reference: generate_payment_reference(now),
            invoice_number: invoice.invoice_number.clone(),
            customer_id: invoice.customer_id,
            amount,
            currency: currency.to_uppercase(),
            method: method.as_str().to_string(),
            status: PaymentStatus::Completed.as_str().to_string(),
            gateway_transaction_id: None,
            original_payment_id: None,
            memo,
            performed_by: performed_by.to_string(),
            processed_utc: now,
            created_utc: now,
        };

        self.ledger.settle(invoice_number, payment, performed_by).await
    }

    /// Charge the invoice's outstanding balance through the payment gateway
    /// and settle on success.
    ///
    /// A declined or timed-out charge leaves the invoice untouched; the
    /// attempt is recorded as a failed payment row and the gateway error is
    /// returned to the caller.
    #[instrument(skip(self))]
    pub async fn initiate_automatic_payment(
        &self,
        invoice_number: &str,
        method: PaymentMethod,
        performed_by: &str,
    ) -> Result<(Invoice, Payment), AppError> {
        let invoice = self.ledger.get_invoice(invoice_number).await?;
        if !invoice.status().accepts_settlement() {
            return Err(AppError::InvalidState(anyhow!(
                "Invoice {} does not accept payments in status '{}'",
                invoice_number,
                invoice.status
            )));
        }

        let already_paid = self.ledger.amount_paid(invoice_number).await?;
        let outstanding = invoice.total - already_paid;
        Self::check_amount(outstanding)?;

        let charge = tokio::time::timeout(
            Duration::from_secs(self.config.gateway_timeout_secs),
            self.gateway
                .charge(invoice_number, outstanding, &invoice.currency),
        )
        .await
        .unwrap_or_else(|_| {
            Err(AppError::Gateway(anyhow!(
                "Gateway charge timed out after {}s",
                self.config.gateway_timeout_secs
            )))
        });

        let now = Utc::now();
        match charge {
            Ok(confirmation) => {
                let payment = Payment {
                    payment_id: Uuid::new_v4(),
                    reference: generate_payment_reference(now),
                    invoice_number: invoice.invoice_number.clone(),
                    customer_id: invoice.customer_id,
                    amount: outstanding,
                    currency: invoice.currency.clone(),
                    method: method.as_str().to_string(),
                    status: PaymentStatus::Completed.as_str().to_string(),
                    gateway_transaction_id: Some(confirmation.transaction_id),
                    original_payment_id: None,
                    memo: None,
                    performed_by: performed_by.to_string(),
                    processed_utc: now,
                    created_utc: now,
                };
                self.ledger.settle(invoice_number, payment, performed_by).await
            }
            Err(gateway_err) => {
                error!(
                    invoice_number = %invoice_number,
                    error = %gateway_err,
                    "Automatic payment failed"
                );
                let failed = Payment {
                    payment_id: Uuid::new_v4(),
                    reference: generate_payment_reference(now),
                    invoice_number: invoice.invoice_number.clone(),
                    customer_id: invoice.customer_id,
                    amount: outstanding,
                    currency: invoice.currency.clone(),
                    method: method.as_str().to_string(),
                    status: PaymentStatus::Failed.as_str().to_string(),
                    gateway_transaction_id: None,
                    original_payment_id: None,
                    memo: Some(gateway_err.to_string()),
                    performed_by: performed_by.to_string(),
                    processed_utc: now,
                    created_utc: now,
                };
                let audit = AuditEntry::new(
                    AuditEntityType::Payment,
                    failed.payment_id.to_string(),
                    "automatic_payment_failed",
                    serde_json::json!({
                        "invoice_number": invoice.invoice_number,
                        "amount": outstanding,
                        "error": gateway_err.to_string(),
                    })
                    .to_string(),
                    performed_by,
                );
                self.store.insert_payment(&failed, &audit).await?;

                metrics::PAYMENTS_TOTAL
                    .with_label_values(&[failed.method.as_str(), failed.status.as_str()])
                    .inc();
                metrics::ERRORS_TOTAL.with_label_values(&["gateway"]).inc();

                Err(gateway_err)
            }
        }
    }

    pub async fn get_payment(&self, payment_id: Uuid) -> Result<Payment, AppError> {
        self.store
            .find_payment(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("Payment {} not found", payment_id)))
    }

    /// Validate a refund and build the row and audit entry without
    /// persisting them. The dispute manager uses this to commit a refund
    /// together with the dispute resolution in one store write.
    pub(crate) async fn prepare_refund(
        &self,
        payment_id: Uuid,
        amount: Decimal,
        memo: Option<String>,
        performed_by: &str,
    ) -> Result<(Payment, AuditEntry), AppError> {
        Self::check_amount(amount)?;

        let original = self.get_payment(payment_id).await?;
        if original.is_refund() {
            return Err(AppError::InvalidState(anyhow!(
                "Payment {} is itself a refund",
                payment_id
            )));
        }
        if original.status() != PaymentStatus::Completed {
            return Err(AppError::InvalidState(anyhow!(
                "Payment {} cannot be refunded from status '{}'",
                payment_id,
                original.status
            )));
        }

        let siblings = self
            .store
            .payments_for_invoice(&original.invoice_number)
            .await?;
        let already_refunded: Decimal = siblings
            .iter()
            .filter(|p| p.original_payment_id == Some(payment_id))
            .map(|p| p.amount)
            .sum();
        let refundable = original.amount - already_refunded;
        if amount > refundable {
            return Err(AppError::BadRequest(anyhow!(
                "Refund of {} exceeds refundable balance {} on payment {}",
                amount,
                refundable,
                payment_id
            )));
        }

        let now = Utc::now();
        let refund = Payment {
            payment_id: Uuid::new_v4(),
            reference: generate_payment_reference(now),
            invoice_number: original.invoice_number.clone(),
            customer_id: original.customer_id,
            amount,
            currency: original.currency.clone(),
            method: original.method.clone(),
            status: PaymentStatus::Completed.as_str().to_string(),
            gateway_transaction_id: None,
            original_payment_id: Some(payment_id),
            memo,
            performed_by: performed_by.to_string(),
            processed_utc: now,
            created_utc: now,
        };
        let audit = AuditEntry::new(
            AuditEntityType::Payment,
            refund.payment_id.to_string(),
            "payment_refunded",
            serde_json::json!({
                "original_payment_id": payment_id,
                "invoice_number": refund.invoice_number,
                "amount": amount,
            })
            .to_string(),
            performed_by,
        );
        Ok((refund, audit))
    }

    /// Refund part or all of a completed payment.
    ///
    /// The refund is capped at the original amount net of prior refunds.
    /// Refunds never move the invoice back in its lifecycle; a paid invoice
    /// stays paid.
    #[instrument(skip(self, memo))]
    pub async fn refund_payment(
        &self,
        payment_id: Uuid,
        amount: Decimal,
        memo: Option<String>,
        performed_by: &str,
    ) -> Result<Payment, AppError> {
        let (refund, audit) = self
            .prepare_refund(payment_id, amount, memo, performed_by)
            .await?;
        self.store.insert_payment(&refund, &audit).await?;

        metrics::PAYMENTS_TOTAL
            .with_label_values(&[refund.method.as_str(), refund.status.as_str()])
            .inc();

        info!(
            payment_id = %refund.payment_id,
            original = %payment_id,
            amount = %amount,
            "Refund recorded"
        );
        Ok(refund)
    }

    /// Payments against an invoice, most recent first.
    pub async fn list_payments(&self, invoice_number: &str) -> Result<Vec<Payment>, AppError> {
        self.store.payments_for_invoice(invoice_number).await
    }
}
