//! Invoice lifecycle and balance bookkeeping.

use crate::directory::CustomerDirectory;
use crate::models::{
    AuditEntityType, AuditEntry, ChargeAmounts, ChargeRequest, CreateInvoiceRequest, Invoice,
    InvoiceStatus, Payment, UpdateInvoiceFields, generate_invoice_number,
};
use crate::notify::NotificationSender;
use crate::services::metrics;
use crate::services::pricing::PricingEngine;
use crate::store::BillingStore;
use anyhow::anyhow;
use chrono::{NaiveDate, Utc};
use engine_core::error::AppError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Owns the invoice state machine:
/// `draft -> sent -> {partially_paid -> paid} | cancelled`.
///
/// Monetary amounts are frozen when the invoice is created; descriptive
/// fields stay editable until the first settlement. All writes go through
/// the store's version check, so two concurrent mutations of one invoice
/// cannot both succeed.
#[derive(Clone)]
pub struct InvoiceLedger {
    store: Arc<dyn BillingStore>,
    pricing: PricingEngine,
    directory: Arc<dyn CustomerDirectory>,
    notifier: Arc<dyn NotificationSender>,
}

impl InvoiceLedger {
    pub fn new(
        store: Arc<dyn BillingStore>,
        pricing: PricingEngine,
        directory: Arc<dyn CustomerDirectory>,
        notifier: Arc<dyn NotificationSender>,
    ) -> Self {
        Self {
            store,
            pricing,
            directory,
            notifier,
        }
    }

    /// Create a draft invoice for a shipment, pricing it through the tier
    /// pipeline.
    #[instrument(skip(self, req, charge), fields(customer_id = %req.customer_id))]
    pub async fn create_invoice(
        &self,
        req: CreateInvoiceRequest,
        charge: ChargeRequest,
    ) -> Result<Invoice, AppError> {
        let amounts = self
            .pricing
            .calculate_charges(&charge, Utc::now().date_naive())
            .await?;
        self.create_with_amounts(req, amounts).await
    }

    /// Create a draft invoice from pre-computed amounts. Shared by shipment
    /// invoicing and the subscription biller.
    pub(crate) async fn create_with_amounts(
        &self,
        req: CreateInvoiceRequest,
        amounts: ChargeAmounts,
    ) -> Result<Invoice, AppError> {
        req.validate()?;

        let profile = self.directory.lookup(req.customer_id).await?;
        let customer_name = match req.customer_name.clone().or_else(|| {
            profile.as_ref().map(|p| p.name.clone())
        }) {
            Some(name) => name,
            None => {
                return Err(AppError::NotFound(anyhow!(
                    "Customer {} is not known to the directory and no name was supplied",
                    req.customer_id
                )))
            }
        };

        let now = Utc::now();
        let invoice = Invoice {
            invoice_id: Uuid::new_v4(),
            invoice_number: generate_invoice_number(now),
            invoice_type: req.invoice_type.as_str().to_string(),
            status: InvoiceStatus::Draft.as_str().to_string(),
            customer_id: req.customer_id,
            customer_name,
            customer_email: req
                .customer_email
                .or_else(|| profile.as_ref().map(|p| p.email.clone())),
            billing_line1: req
                .billing_line1
                .or_else(|| profile.as_ref().map(|p| p.billing_line1.clone())),
            billing_city: req
                .billing_city
                .or_else(|| profile.as_ref().map(|p| p.billing_city.clone())),
            billing_postal_code: req
                .billing_postal_code
                .or_else(|| profile.as_ref().map(|p| p.billing_postal_code.clone())),
            billing_country: req
                .billing_country
                .or_else(|| profile.as_ref().map(|p| p.billing_country.clone())),
            description: req.description,
            currency: req.currency.to_uppercase(),
            subtotal: amounts.subtotal,
            discount: amounts.discount,
            tax: amounts.tax,
            total: amounts.total,
            due_date: req.due_date,
            shipment_id: req.shipment_id,
            subscription_id: req.subscription_id,
            created_by: req.performed_by.clone(),
            updated_by: None,
            version: 1,
            created_utc: now,
            sent_utc: None,
            paid_utc: None,
            cancelled_utc: None,
        };

        let audit = AuditEntry::new(
            AuditEntityType::Invoice,
            &invoice.invoice_number,
            "invoice_created",
            serde_json::json!({
                "invoice_type": invoice.invoice_type,
                "customer_id": invoice.customer_id,
                "total": invoice.total,
                "currency": invoice.currency,
            })
            .to_string(),
            &req.performed_by,
        );
        self.store.insert_invoice(&invoice, &audit).await?;

        metrics::INVOICES_TOTAL
            .with_label_values(&[invoice.status.as_str()])
            .inc();
        metrics::INVOICE_AMOUNT_TOTAL
            .with_label_values(&[invoice.currency.as_str()])
            .inc_by(invoice.total.to_f64().unwrap_or(0.0));

        info!(
            invoice_number = %invoice.invoice_number,
            total = %invoice.total,
            "Draft invoice created"
        );
        Ok(invoice)
    }

    pub async fn get_invoice(&self, invoice_number: &str) -> Result<Invoice, AppError> {
        self.store
            .find_invoice(invoice_number)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("Invoice {} not found", invoice_number)))
    }

    /// Issue a draft invoice to the customer. Not idempotent: finalizing a
    /// non-draft invoice is an invalid-state error.
    #[instrument(skip(self))]
    pub async fn finalize_invoice(
        &self,
        invoice_number: &str,
        performed_by: &str,
    ) -> Result<Invoice, AppError> {
        let mut invoice = self.get_invoice(invoice_number).await?;
        if invoice.status() != InvoiceStatus::Draft {
            return Err(AppError::InvalidState(anyhow!(
                "Invoice {} cannot be finalized from status '{}'",
                invoice_number,
                invoice.status
            )));
        }

        invoice.status = InvoiceStatus::Sent.as_str().to_string();
        invoice.sent_utc = Some(Utc::now());
        invoice.updated_by = Some(performed_by.to_string());
        invoice.version += 1;

        let audit = AuditEntry::new(
            AuditEntityType::Invoice,
            &invoice.invoice_number,
            "invoice_finalized",
            serde_json::json!({ "total": invoice.total, "due_date": invoice.due_date }).to_string(),
            performed_by,
        );
        self.store.update_invoice(&invoice, &audit).await?;

        metrics::INVOICES_TOTAL
            .with_label_values(&[invoice.status.as_str()])
            .inc();

        self.emit(
            "invoice.sent",
            serde_json::json!({
                "invoice_number": invoice.invoice_number,
                "customer_id": invoice.customer_id,
                "total": invoice.total,
                "currency": invoice.currency,
                "due_date": invoice.due_date,
            }),
        )
        .await;

        info!(invoice_number = %invoice.invoice_number, "Invoice finalized");
        Ok(invoice)
    }

    /// Amend descriptive fields, currency included. Allowed while draft or
    /// sent; the monetary amounts themselves are frozen at creation.
    #[instrument(skip(self, fields))]
    pub async fn update_invoice(
        &self,
        invoice_number: &str,
        fields: UpdateInvoiceFields,
        performed_by: &str,
    ) -> Result<Invoice, AppError> {
        let mut invoice = self.get_invoice(invoice_number).await?;
        let status = invoice.status();
        if !matches!(status, InvoiceStatus::Draft | InvoiceStatus::Sent) {
            return Err(AppError::InvalidState(anyhow!(
                "Invoice {} cannot be updated in status '{}'",
                invoice_number,
                invoice.status
            )));
        }

        if let Some(currency) = &fields.currency {
            if currency.len() != 3 {
                return Err(AppError::BadRequest(anyhow!(
                    "Currency must be a 3-letter code"
                )));
            }
            invoice.currency = currency.to_uppercase();
        }

        let mut changed: Vec<&str> = Vec::new();
        if fields.currency.is_some() {
            changed.push("currency");
        }
        if let Some(name) = fields.customer_name {
            invoice.customer_name = name;
            changed.push("customer_name");
        }
        if let Some(email) = fields.customer_email {
            invoice.customer_email = Some(email);
            changed.push("customer_email");
        }
        if let Some(line1) = fields.billing_line1 {
            invoice.billing_line1 = Some(line1);
            changed.push("billing_line1");
        }
        if let Some(city) = fields.billing_city {
            invoice.billing_city = Some(city);
            changed.push("billing_city");
        }
        if let Some(postal) = fields.billing_postal_code {
            invoice.billing_postal_code = Some(postal);
            changed.push("billing_postal_code");
        }
        if let Some(country) = fields.billing_country {
            invoice.billing_country = Some(country);
            changed.push("billing_country");
        }
        if let Some(description) = fields.description {
            invoice.description = Some(description);
            changed.push("description");
        }
        if let Some(due_date) = fields.due_date {
            invoice.due_date = due_date;
            changed.push("due_date");
        }

        if changed.is_empty() {
            return Ok(invoice);
        }

        invoice.updated_by = Some(performed_by.to_string());
        invoice.version += 1;

        let audit = AuditEntry::new(
            AuditEntityType::Invoice,
            &invoice.invoice_number,
            "invoice_updated",
            serde_json::json!({ "fields": changed }).to_string(),
            performed_by,
        );
        self.store.update_invoice(&invoice, &audit).await?;

        info!(
            invoice_number = %invoice.invoice_number,
            fields = ?changed,
            "Invoice updated"
        );
        Ok(invoice)
    }

    /// Cancel an invoice. Permitted from draft or sent; once money has been
    /// applied the invoice can no longer be cancelled.
    #[instrument(skip(self))]
    pub async fn cancel_invoice(
        &self,
        invoice_number: &str,
        reason: &str,
        performed_by: &str,
    ) -> Result<Invoice, AppError> {
        let mut invoice = self.get_invoice(invoice_number).await?;
        if !matches!(invoice.status(), InvoiceStatus::Draft | InvoiceStatus::Sent) {
            return Err(AppError::InvalidState(anyhow!(
                "Invoice {} cannot be cancelled from status '{}'",
                invoice_number,
                invoice.status
            )));
        }

        invoice.status = InvoiceStatus::Cancelled.as_str().to_string();
        invoice.cancelled_utc = Some(Utc::now());
        invoice.updated_by = Some(performed_by.to_string());
        invoice.version += 1;

        let audit = AuditEntry::new(
            AuditEntityType::Invoice,
            &invoice.invoice_number,
            "invoice_cancelled",
            serde_json::json!({ "reason": reason }).to_string(),
            performed_by,
        );
        self.store.update_invoice(&invoice, &audit).await?;

        metrics::INVOICES_TOTAL
            .with_label_values(&[invoice.status.as_str()])
            .inc();

        info!(invoice_number = %invoice.invoice_number, reason = %reason, "Invoice cancelled");
        Ok(invoice)
    }

    /// Sum of completed, non-refund payments against the invoice.
    pub async fn amount_paid(&self, invoice_number: &str) -> Result<Decimal, AppError> {
        let payments = self.store.payments_for_invoice(invoice_number).await?;
        Ok(payments
            .iter()
            .filter(|p| p.counts_toward_balance())
            .map(|p| p.amount)
            .sum())
    }

    /// Apply a completed payment against the invoice's outstanding balance.
    ///
    /// Amount-exact: a payment exceeding the outstanding balance is rejected
    /// with `Overpayment` and nothing is recorded. The invoice write, the
    /// payment row, and the audit entry commit atomically.
    pub(crate) async fn settle(
        &self,
        invoice_number: &str,
        payment: Payment,
        performed_by: &str,
    ) -> Result<(Invoice, Payment), AppError> {
        let _timer = metrics::OP_DURATION
            .with_label_values(&["settle"])
            .start_timer();

        let mut invoice = self.get_invoice(invoice_number).await?;
        if !invoice.status().accepts_settlement() {
            return Err(AppError::InvalidState(anyhow!(
                "Invoice {} does not accept payments in status '{}'",
                invoice_number,
                invoice.status
            )));
        }
        if payment.currency != invoice.currency {
            return Err(AppError::BadRequest(anyhow!(
                "Payment currency {} does not match invoice currency {}",
                payment.currency,
                invoice.currency
            )));
        }

        let already_paid = self.amount_paid(invoice_number).await?;
        let outstanding = invoice.total - already_paid;
        if payment.amount > outstanding {
            warn!(
                invoice_number = %invoice_number,
                amount = %payment.amount,
                outstanding = %outstanding,
                "Overpayment rejected"
            );
            return Err(AppError::Overpayment(anyhow!(
                "Payment of {} exceeds outstanding balance {} on invoice {}",
                payment.amount,
                outstanding,
                invoice_number
            )));
        }

        let fully_paid = payment.amount == outstanding;
        invoice.status = if fully_paid {
            InvoiceStatus::Paid.as_str().to_string()
        } else {
            InvoiceStatus::PartiallyPaid.as_str().to_string()
        };
        if fully_paid {
            invoice.paid_utc = Some(Utc::now());
        }
        invoice.updated_by = Some(performed_by.to_string());
        invoice.version += 1;

        let audit = AuditEntry::new(
            AuditEntityType::Payment,
            &payment.payment_id.to_string(),
            "payment_applied",
            serde_json::json!({
                "invoice_number": invoice.invoice_number,
                "amount": payment.amount,
                "method": payment.method,
                "invoice_status": invoice.status,
            })
            .to_string(),
            performed_by,
        );
        self.store
            .record_settlement(&invoice, &payment, &audit)
            .await?;

        metrics::PAYMENTS_TOTAL
            .with_label_values(&[payment.method.as_str(), payment.status.as_str()])
            .inc();
        metrics::PAYMENT_AMOUNT_TOTAL
            .with_label_values(&[payment.currency.as_str()])
            .inc_by(payment.amount.to_f64().unwrap_or(0.0));
        metrics::INVOICES_TOTAL
            .with_label_values(&[invoice.status.as_str()])
            .inc();

        if fully_paid {
            self.emit(
                "invoice.paid",
                serde_json::json!({
                    "invoice_number": invoice.invoice_number,
                    "customer_id": invoice.customer_id,
                    "total": invoice.total,
                    "currency": invoice.currency,
                }),
            )
            .await;
        }

        info!(
            invoice_number = %invoice.invoice_number,
            amount = %payment.amount,
            status = %invoice.status,
            "Payment applied"
        );
        Ok((invoice, payment))
    }

    /// Sent or partially paid invoices whose due date has passed.
    #[instrument(skip(self))]
    pub async fn get_overdue_invoices(&self, as_of: NaiveDate) -> Result<Vec<Invoice>, AppError> {
        self.store.find_overdue_invoices(as_of).await
    }

    /// Best-effort notification; failures are logged, never propagated.
    async fn emit(&self, event: &str, payload: serde_json::Value) {
        if let Err(e) = self.notifier.notify(event, payload).await {
            warn!(event = %event, error = %e, "Notification delivery failed");
        }
    }
}
