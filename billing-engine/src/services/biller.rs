//! Recurring subscription billing.

use crate::models::{
    AuditEntityType, AuditEntry, BillingFailure, BillingRunReport, CreateInvoiceRequest, Invoice,
    InvoiceType, Subscription,
};
use crate::services::ledger::InvoiceLedger;
use crate::services::pricing::PricingEngine;
use crate::store::BillingStore;
use anyhow::anyhow;
use chrono::{Duration, NaiveDate, Utc};
use engine_core::config::BillingConfig;
use engine_core::error::AppError;
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Generates subscription invoices on a schedule.
///
/// Each due subscription becomes one issued invoice; the batch is
/// best-effort and a failing subscription never stops the rest of the run.
#[derive(Clone)]
pub struct SubscriptionBiller {
    store: Arc<dyn BillingStore>,
    pricing: PricingEngine,
    ledger: InvoiceLedger,
    config: BillingConfig,
}

impl SubscriptionBiller {
    pub fn new(
        store: Arc<dyn BillingStore>,
        pricing: PricingEngine,
        ledger: InvoiceLedger,
        config: BillingConfig,
    ) -> Self {
        Self {
            store,
            pricing,
            ledger,
            config,
        }
    }

    /// Register a subscription for recurring billing.
    #[instrument(skip(self, subscription), fields(subscription_id = %subscription.subscription_id))]
    pub async fn register_subscription(
        &self,
        subscription: Subscription,
        performed_by: &str,
    ) -> Result<Subscription, AppError> {
        if subscription.base_amount < Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow!(
                "Subscription base amount must not be negative"
            )));
        }
        if subscription.currency.len() != 3 {
            return Err(AppError::BadRequest(anyhow!(
                "Currency must be a 3-letter code"
            )));
        }

        self.store.insert_subscription(&subscription).await?;
        self.store
            .append_audit(&AuditEntry::new(
                AuditEntityType::Subscription,
                subscription.subscription_id.to_string(),
                "subscription_registered",
                serde_json::json!({
                    "customer_id": subscription.customer_id,
                    "billing_interval": subscription.billing_interval,
                    "base_amount": subscription.base_amount,
                    "next_billing_date": subscription.next_billing_date,
                })
                .to_string(),
                performed_by,
            ))
            .await?;

        info!(
            subscription_id = %subscription.subscription_id,
            interval = %subscription.billing_interval,
            "Subscription registered"
        );
        Ok(subscription)
    }

    /// Bill every active subscription whose `next_billing_date` has arrived.
    ///
    /// Subscriptions are processed concurrently up to the configured worker
    /// bound; each one is an independent invoice creation.
    #[instrument(skip(self))]
    pub async fn run_billing_cycle(
        &self,
        as_of: NaiveDate,
        performed_by: &str,
    ) -> Result<BillingRunReport, AppError> {
        let run_id = Uuid::new_v4();
        let started_utc = Utc::now();
        let due = self.store.find_due_subscriptions(as_of).await?;

        info!(
            run_id = %run_id,
            due = due.len(),
            as_of = %as_of,
            "Billing cycle started"
        );

        let results: Vec<(Uuid, Result<Invoice, AppError>)> = stream::iter(due)
            .map(|subscription| {
                let biller = self.clone();
                let performed_by = performed_by.to_string();
                async move {
                    let id = subscription.subscription_id;
                    let outcome = biller.bill_one(subscription, as_of, &performed_by).await;
                    (id, outcome)
                }
            })
            .buffer_unordered(self.config.billing_concurrency)
            .collect()
            .await;

        let mut invoices_created = Vec::new();
        let mut failures = Vec::new();
        for (subscription_id, outcome) in results {
            match outcome {
                Ok(invoice) => invoices_created.push(invoice.invoice_number),
                Err(e) => {
                    error!(
                        subscription_id = %subscription_id,
                        error = %e,
                        "Subscription billing failed"
                    );
                    failures.push(BillingFailure {
                        subscription_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        let report = BillingRunReport {
            run_id,
            started_utc,
            finished_utc: Utc::now(),
            invoices_created,
            failures,
        };

        info!(
            run_id = %run_id,
            created = report.invoices_created.len(),
            failed = report.failures.len(),
            "Billing cycle finished"
        );
        Ok(report)
    }

    /// Price, create, and issue one subscription invoice, then advance the
    /// subscription's billing date.
    async fn bill_one(
        &self,
        subscription: Subscription,
        as_of: NaiveDate,
        performed_by: &str,
    ) -> Result<Invoice, AppError> {
        let amounts = self
            .pricing
            .price_subscription(subscription.base_amount, subscription.monthly_volume, as_of)
            .await?;

        let interval = subscription.billing_interval();
        let period_start = subscription.next_billing_date;
        let req = CreateInvoiceRequest {
            customer_id: subscription.customer_id,
            customer_name: Some(subscription.customer_name.clone()),
            customer_email: subscription.customer_email.clone(),
            billing_line1: None,
            billing_city: None,
            billing_postal_code: None,
            billing_country: None,
            description: Some(format!(
                "Subscription charge ({}) for period starting {}",
                subscription.billing_interval, period_start
            )),
            currency: subscription.currency.clone(),
            due_date: as_of + Duration::days(self.config.invoice_due_days),
            invoice_type: InvoiceType::Subscription,
            shipment_id: None,
            subscription_id: Some(subscription.subscription_id),
            performed_by: performed_by.to_string(),
        };

        let invoice = self.ledger.create_with_amounts(req, amounts).await?;
        let invoice = self
            .ledger
            .finalize_invoice(&invoice.invoice_number, performed_by)
            .await?;

        self.store
            .advance_subscription(subscription.subscription_id, interval.advance(period_start))
            .await?;

        Ok(invoice)
    }
}
