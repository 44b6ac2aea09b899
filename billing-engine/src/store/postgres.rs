//! PostgreSQL `BillingStore` adapter.
//!
//! Compound writes run inside explicit transactions: the entity mutation and
//! its audit row commit together. Invoice writes are guarded by a version
//! check so concurrent settlements cannot both observe the pre-payment
//! balance.

use super::BillingStore;
use crate::models::{
    AuditEntry, BillingDispute, CustomerCredit, Invoice, Payment, PricingTier, Subscription,
};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use engine_core::error::AppError;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Postgres;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const INVOICE_COLUMNS: &str = "invoice_id, invoice_number, invoice_type, status, customer_id, customer_name, \
     customer_email, billing_line1, billing_city, billing_postal_code, billing_country, \
     description, currency, subtotal, discount, tax, total, due_date, shipment_id, \
     subscription_id, created_by, updated_by, version, created_utc, sent_utc, paid_utc, cancelled_utc";

const PAYMENT_COLUMNS: &str = "payment_id, reference, invoice_number, customer_id, amount, currency, method, \
     status, gateway_transaction_id, original_payment_id, memo, performed_by, processed_utc, created_utc";

const SUBSCRIPTION_COLUMNS: &str = "subscription_id, customer_id, customer_name, customer_email, status, \
     billing_interval, base_amount, monthly_volume, currency, start_date, end_date, \
     next_billing_date, created_utc, updated_utc";

const DISPUTE_COLUMNS: &str = "dispute_id, dispute_number, customer_id, invoice_number, reason, status, \
     due_date, created_utc, resolved_utc, resolution_amount, resolution_note";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

async fn insert_payment_tx(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    payment: &Payment,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO payments (payment_id, reference, invoice_number, customer_id, amount, currency, \
         method, status, gateway_transaction_id, original_payment_id, memo, performed_by, \
         processed_utc, created_utc) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
    )
    .bind(payment.payment_id)
    .bind(&payment.reference)
    .bind(&payment.invoice_number)
    .bind(payment.customer_id)
    .bind(payment.amount)
    .bind(&payment.currency)
    .bind(&payment.method)
    .bind(&payment.status)
    .bind(&payment.gateway_transaction_id)
    .bind(payment.original_payment_id)
    .bind(&payment.memo)
    .bind(&payment.performed_by)
    .bind(payment.processed_utc)
    .bind(payment.created_utc)
    .execute(&mut **tx)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            AppError::Conflict(anyhow!("Payment {} already exists", payment.payment_id))
        }
        _ => AppError::DatabaseError(anyhow!("Failed to insert payment: {}", e)),
    })?;
    Ok(())
}

async fn insert_audit_tx(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    entry: &AuditEntry,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO billing_audit (audit_id, entity_type, entity_id, action, details, performed_by, created_utc) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(entry.audit_id)
    .bind(&entry.entity_type)
    .bind(&entry.entity_id)
    .bind(&entry.action)
    .bind(&entry.details)
    .bind(&entry.performed_by)
    .bind(entry.created_utc)
    .execute(&mut **tx)
    .await
    .map_err(|e| AppError::AuditPersistence(anyhow!("Failed to write audit entry: {}", e)))?;
    Ok(())
}

/// Version-checked invoice write. Returns `Conflict` when the stored version
/// does not match `invoice.version - 1`, `NotFound` when the row is missing.
async fn update_invoice_tx(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    invoice: &Invoice,
) -> Result<(), AppError> {
    let result = sqlx::query(
        "UPDATE invoices \
         SET status = $2, customer_name = $3, customer_email = $4, billing_line1 = $5, \
             billing_city = $6, billing_postal_code = $7, billing_country = $8, description = $9, \
             currency = $10, due_date = $11, updated_by = $12, version = $13, sent_utc = $14, \
             paid_utc = $15, cancelled_utc = $16 \
         WHERE invoice_number = $1 AND version = $17",
    )
    .bind(&invoice.invoice_number)
    .bind(&invoice.status)
    .bind(&invoice.customer_name)
    .bind(&invoice.customer_email)
    .bind(&invoice.billing_line1)
    .bind(&invoice.billing_city)
    .bind(&invoice.billing_postal_code)
    .bind(&invoice.billing_country)
    .bind(&invoice.description)
    .bind(&invoice.currency)
    .bind(invoice.due_date)
    .bind(&invoice.updated_by)
    .bind(invoice.version)
    .bind(invoice.sent_utc)
    .bind(invoice.paid_utc)
    .bind(invoice.cancelled_utc)
    .bind(invoice.version - 1)
    .execute(&mut **tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow!("Failed to update invoice: {}", e)))?;

    if result.rows_affected() == 0 {
        let exists: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM invoices WHERE invoice_number = $1")
                .bind(&invoice.invoice_number)
                .fetch_optional(&mut **tx)
                .await
                .map_err(|e| AppError::DatabaseError(anyhow!("Failed to check invoice: {}", e)))?;
        return match exists {
            Some(_) => Err(AppError::Conflict(anyhow!(
                "Invoice {} was modified concurrently",
                invoice.invoice_number
            ))),
            None => Err(AppError::NotFound(anyhow!(
                "Invoice {} not found",
                invoice.invoice_number
            ))),
        };
    }
    Ok(())
}

#[async_trait]
impl BillingStore for PgStore {
    #[instrument(skip(self, invoice, audit), fields(invoice_number = %invoice.invoice_number))]
    async fn insert_invoice(&self, invoice: &Invoice, audit: &AuditEntry) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to begin transaction: {}", e)))?;

        sqlx::query(
            "INSERT INTO invoices (invoice_id, invoice_number, invoice_type, status, customer_id, \
             customer_name, customer_email, billing_line1, billing_city, billing_postal_code, \
             billing_country, description, currency, subtotal, discount, tax, total, due_date, \
             shipment_id, subscription_id, created_by, updated_by, version, created_utc, sent_utc, \
             paid_utc, cancelled_utc) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, \
             $18, $19, $20, $21, $22, $23, $24, $25, $26, $27)",
        )
        .bind(invoice.invoice_id)
        .bind(&invoice.invoice_number)
        .bind(&invoice.invoice_type)
        .bind(&invoice.status)
        .bind(invoice.customer_id)
        .bind(&invoice.customer_name)
        .bind(&invoice.customer_email)
        .bind(&invoice.billing_line1)
        .bind(&invoice.billing_city)
        .bind(&invoice.billing_postal_code)
        .bind(&invoice.billing_country)
        .bind(&invoice.description)
        .bind(&invoice.currency)
        .bind(invoice.subtotal)
        .bind(invoice.discount)
        .bind(invoice.tax)
        .bind(invoice.total)
        .bind(invoice.due_date)
        .bind(invoice.shipment_id)
        .bind(invoice.subscription_id)
        .bind(&invoice.created_by)
        .bind(&invoice.updated_by)
        .bind(invoice.version)
        .bind(invoice.created_utc)
        .bind(invoice.sent_utc)
        .bind(invoice.paid_utc)
        .bind(invoice.cancelled_utc)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow!(
                    "Invoice number {} already exists",
                    invoice.invoice_number
                ))
            }
            _ => AppError::DatabaseError(anyhow!("Failed to insert invoice: {}", e)),
        })?;

        insert_audit_tx(&mut tx, audit).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to commit: {}", e)))?;

        info!(invoice_number = %invoice.invoice_number, "Invoice created");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_invoice(&self, invoice_number: &str) -> Result<Option<Invoice>, AppError> {
        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {} FROM invoices WHERE invoice_number = $1",
            INVOICE_COLUMNS
        ))
        .bind(invoice_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to get invoice: {}", e)))?;
        Ok(invoice)
    }

    #[instrument(skip(self, invoice, audit), fields(invoice_number = %invoice.invoice_number))]
    async fn update_invoice(&self, invoice: &Invoice, audit: &AuditEntry) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to begin transaction: {}", e)))?;

        update_invoice_tx(&mut tx, invoice).await?;
        insert_audit_tx(&mut tx, audit).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to commit: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_overdue_invoices(&self, as_of: NaiveDate) -> Result<Vec<Invoice>, AppError> {
        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {} FROM invoices \
             WHERE status IN ('sent', 'partially_paid') AND due_date < $1 \
             ORDER BY due_date",
            INVOICE_COLUMNS
        ))
        .bind(as_of)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to list overdue invoices: {}", e)))?;
        Ok(invoices)
    }

    #[instrument(
        skip(self, invoice, payment, audit),
        fields(invoice_number = %invoice.invoice_number, amount = %payment.amount)
    )]
    async fn record_settlement(
        &self,
        invoice: &Invoice,
        payment: &Payment,
        audit: &AuditEntry,
    ) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to begin transaction: {}", e)))?;

        update_invoice_tx(&mut tx, invoice).await?;
        insert_payment_tx(&mut tx, payment).await?;
        insert_audit_tx(&mut tx, audit).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to commit: {}", e)))?;

        info!(
            invoice_number = %invoice.invoice_number,
            status = %invoice.status,
            "Settlement recorded"
        );
        Ok(())
    }

    #[instrument(skip(self, payment, audit), fields(payment_id = %payment.payment_id))]
    async fn insert_payment(&self, payment: &Payment, audit: &AuditEntry) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to begin transaction: {}", e)))?;

        insert_payment_tx(&mut tx, payment).await?;
        insert_audit_tx(&mut tx, audit).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to commit: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, AppError> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE payment_id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to get payment: {}", e)))?;
        Ok(payment)
    }

    #[instrument(skip(self))]
    async fn payments_for_invoice(&self, invoice_number: &str) -> Result<Vec<Payment>, AppError> {
        let payments = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE invoice_number = $1 ORDER BY created_utc DESC",
            PAYMENT_COLUMNS
        ))
        .bind(invoice_number)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to list payments: {}", e)))?;
        Ok(payments)
    }

    #[instrument(skip(self, tier), fields(name = %tier.name))]
    async fn insert_tier(&self, tier: &PricingTier) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO pricing_tiers (name, min_monthly_volume, max_monthly_volume, active, \
             effective_from, effective_until, discount_percent, created_utc) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&tier.name)
        .bind(tier.min_monthly_volume)
        .bind(tier.max_monthly_volume)
        .bind(tier.active)
        .bind(tier.effective_from)
        .bind(tier.effective_until)
        .bind(tier.discount_percent)
        .bind(tier.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow!("Pricing tier '{}' already exists", tier.name))
            }
            _ => AppError::DatabaseError(anyhow!("Failed to insert tier: {}", e)),
        })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_tiers(&self) -> Result<Vec<PricingTier>, AppError> {
        let tiers = sqlx::query_as::<_, PricingTier>(
            "SELECT name, min_monthly_volume, max_monthly_volume, active, effective_from, \
             effective_until, discount_percent, created_utc \
             FROM pricing_tiers ORDER BY min_monthly_volume",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to list tiers: {}", e)))?;
        Ok(tiers)
    }

    #[instrument(skip(self, subscription), fields(subscription_id = %subscription.subscription_id))]
    async fn insert_subscription(&self, subscription: &Subscription) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO subscriptions (subscription_id, customer_id, customer_name, customer_email, \
             status, billing_interval, base_amount, monthly_volume, currency, start_date, end_date, \
             next_billing_date, created_utc, updated_utc) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(subscription.subscription_id)
        .bind(subscription.customer_id)
        .bind(&subscription.customer_name)
        .bind(&subscription.customer_email)
        .bind(&subscription.status)
        .bind(&subscription.billing_interval)
        .bind(subscription.base_amount)
        .bind(subscription.monthly_volume)
        .bind(&subscription.currency)
        .bind(subscription.start_date)
        .bind(subscription.end_date)
        .bind(subscription.next_billing_date)
        .bind(subscription.created_utc)
        .bind(subscription.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to insert subscription: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_due_subscriptions(
        &self,
        as_of: NaiveDate,
    ) -> Result<Vec<Subscription>, AppError> {
        let subscriptions = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {} FROM subscriptions \
             WHERE status = 'active' AND next_billing_date <= $1 \
               AND (end_date IS NULL OR end_date >= $1) \
             ORDER BY next_billing_date",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(as_of)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to list due subscriptions: {}", e)))?;
        Ok(subscriptions)
    }

    #[instrument(skip(self))]
    async fn advance_subscription(
        &self,
        subscription_id: Uuid,
        next_billing_date: NaiveDate,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE subscriptions SET next_billing_date = $2, updated_utc = NOW() \
             WHERE subscription_id = $1",
        )
        .bind(subscription_id)
        .bind(next_billing_date)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to advance subscription: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow!(
                "Subscription {} not found",
                subscription_id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, dispute, audit), fields(dispute_number = %dispute.dispute_number))]
    async fn insert_dispute(
        &self,
        dispute: &BillingDispute,
        audit: &AuditEntry,
    ) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to begin transaction: {}", e)))?;

        sqlx::query(
            "INSERT INTO billing_disputes (dispute_id, dispute_number, customer_id, invoice_number, \
             reason, status, due_date, created_utc, resolved_utc, resolution_amount, resolution_note) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(dispute.dispute_id)
        .bind(&dispute.dispute_number)
        .bind(dispute.customer_id)
        .bind(&dispute.invoice_number)
        .bind(&dispute.reason)
        .bind(&dispute.status)
        .bind(dispute.due_date)
        .bind(dispute.created_utc)
        .bind(dispute.resolved_utc)
        .bind(dispute.resolution_amount)
        .bind(&dispute.resolution_note)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow!(
                    "Dispute number {} already exists",
                    dispute.dispute_number
                ))
            }
            _ => AppError::DatabaseError(anyhow!("Failed to insert dispute: {}", e)),
        })?;

        insert_audit_tx(&mut tx, audit).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to commit: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_dispute(&self, dispute_id: Uuid) -> Result<Option<BillingDispute>, AppError> {
        let dispute = sqlx::query_as::<_, BillingDispute>(&format!(
            "SELECT {} FROM billing_disputes WHERE dispute_id = $1",
            DISPUTE_COLUMNS
        ))
        .bind(dispute_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to get dispute: {}", e)))?;
        Ok(dispute)
    }

    #[instrument(skip(self, dispute, audit), fields(dispute_id = %dispute.dispute_id))]
    async fn update_dispute(
        &self,
        dispute: &BillingDispute,
        audit: &AuditEntry,
    ) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to begin transaction: {}", e)))?;

        let result = sqlx::query(
            "UPDATE billing_disputes \
             SET status = $2, due_date = $3, resolved_utc = $4, resolution_amount = $5, \
                 resolution_note = $6 \
             WHERE dispute_id = $1",
        )
        .bind(dispute.dispute_id)
        .bind(&dispute.status)
        .bind(dispute.due_date)
        .bind(dispute.resolved_utc)
        .bind(dispute.resolution_amount)
        .bind(&dispute.resolution_note)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to update dispute: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow!(
                "Dispute {} not found",
                dispute.dispute_id
            )));
        }

        insert_audit_tx(&mut tx, audit).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to commit: {}", e)))?;
        Ok(())
    }

    #[instrument(
        skip(self, dispute, audit),
        fields(dispute_id = %dispute.dispute_id, customer_id = %dispute.customer_id)
    )]
    async fn resolve_with_credit(
        &self,
        dispute: &BillingDispute,
        currency: &str,
        amount: Decimal,
        audit: &AuditEntry,
    ) -> Result<CustomerCredit, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to begin transaction: {}", e)))?;

        let result = sqlx::query(
            "UPDATE billing_disputes \
             SET status = $2, due_date = $3, resolved_utc = $4, resolution_amount = $5, \
                 resolution_note = $6 \
             WHERE dispute_id = $1",
        )
        .bind(dispute.dispute_id)
        .bind(&dispute.status)
        .bind(dispute.due_date)
        .bind(dispute.resolved_utc)
        .bind(dispute.resolution_amount)
        .bind(&dispute.resolution_note)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to update dispute: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow!(
                "Dispute {} not found",
                dispute.dispute_id
            )));
        }

        // Delta upsert; the guarded currency keeps concurrent resolutions
        // from summing across currencies.
        let credit = sqlx::query_as::<_, CustomerCredit>(
            "INSERT INTO customer_credits (customer_id, balance, currency, updated_utc) \
             VALUES ($1, $2, $3, NOW()) \
             ON CONFLICT (customer_id) \
             DO UPDATE SET balance = customer_credits.balance + EXCLUDED.balance, \
                 updated_utc = NOW() \
             WHERE customer_credits.currency = EXCLUDED.currency \
             RETURNING customer_id, balance, currency, updated_utc",
        )
        .bind(dispute.customer_id)
        .bind(amount)
        .bind(currency)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to upsert credit: {}", e)))?
        .ok_or_else(|| {
            AppError::BadRequest(anyhow!(
                "Credit balance for customer {} is held in another currency than {}",
                dispute.customer_id,
                currency
            ))
        })?;

        insert_audit_tx(&mut tx, audit).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to commit: {}", e)))?;

        info!(
            dispute_number = %dispute.dispute_number,
            balance = %credit.balance,
            "Dispute resolved with customer credit"
        );
        Ok(credit)
    }

    #[instrument(
        skip(self, dispute, refund, refund_audit, audit),
        fields(dispute_id = %dispute.dispute_id, payment_id = %refund.payment_id)
    )]
    async fn resolve_with_refund(
        &self,
        dispute: &BillingDispute,
        refund: &Payment,
        refund_audit: &AuditEntry,
        audit: &AuditEntry,
    ) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to begin transaction: {}", e)))?;

        let result = sqlx::query(
            "UPDATE billing_disputes \
             SET status = $2, due_date = $3, resolved_utc = $4, resolution_amount = $5, \
                 resolution_note = $6 \
             WHERE dispute_id = $1",
        )
        .bind(dispute.dispute_id)
        .bind(&dispute.status)
        .bind(dispute.due_date)
        .bind(dispute.resolved_utc)
        .bind(dispute.resolution_amount)
        .bind(&dispute.resolution_note)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to update dispute: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow!(
                "Dispute {} not found",
                dispute.dispute_id
            )));
        }

        insert_payment_tx(&mut tx, refund).await?;
        insert_audit_tx(&mut tx, refund_audit).await?;
        insert_audit_tx(&mut tx, audit).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to commit: {}", e)))?;

        info!(
            dispute_number = %dispute.dispute_number,
            amount = %refund.amount,
            "Dispute resolved with refund"
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_disputes_due_for_review(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<BillingDispute>, AppError> {
        let disputes = sqlx::query_as::<_, BillingDispute>(&format!(
            "SELECT {} FROM billing_disputes \
             WHERE due_date < $1 \
               AND status NOT IN ('resolved_customer_favor', 'resolved_merchant_favor', 'closed_no_resolution') \
             ORDER BY due_date",
            DISPUTE_COLUMNS
        ))
        .bind(as_of)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to list due disputes: {}", e)))?;
        Ok(disputes)
    }

    #[instrument(skip(self))]
    async fn find_credit(&self, customer_id: Uuid) -> Result<Option<CustomerCredit>, AppError> {
        let credit = sqlx::query_as::<_, CustomerCredit>(
            "SELECT customer_id, balance, currency, updated_utc \
             FROM customer_credits WHERE customer_id = $1",
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to get credit: {}", e)))?;
        Ok(credit)
    }

    #[instrument(skip(self, entry), fields(entity_id = %entry.entity_id, action = %entry.action))]
    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to begin transaction: {}", e)))?;
        insert_audit_tx(&mut tx, entry).await?;
        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to commit: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn audit_trail(&self, entity_id: &str) -> Result<Vec<AuditEntry>, AppError> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            "SELECT audit_id, entity_type, entity_id, action, details, performed_by, created_utc \
             FROM billing_audit WHERE entity_id = $1 ORDER BY created_utc",
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to read audit trail: {}", e)))?;
        Ok(entries)
    }
}
