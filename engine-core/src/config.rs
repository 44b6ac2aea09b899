use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;

/// Engine configuration.
///
/// Loaded from an optional `configuration` file plus `BILLING__`-prefixed
/// environment overrides, e.g. `BILLING__TAX_PERCENT=7.5`.
#[derive(Debug, Deserialize, Clone)]
pub struct BillingConfig {
    /// Discount percent applied when no pricing tier matches.
    #[serde(default = "default_discount_percent")]
    pub default_discount_percent: f64,

    /// Flat tax percent applied to the discounted subtotal.
    #[serde(default = "default_tax_percent")]
    pub tax_percent: f64,

    /// Duty percent applied to declared shipment value.
    #[serde(default = "default_duty_percent")]
    pub duty_percent: f64,

    /// Upper bound on the external payment gateway call, in seconds.
    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,

    /// Worker pool size for the subscription billing cycle.
    #[serde(default = "default_billing_concurrency")]
    pub billing_concurrency: usize,

    /// Days until a newly opened dispute is due for review.
    #[serde(default = "default_dispute_review_days")]
    pub dispute_review_days: i64,

    /// Payment terms for subscription invoices, in days from issue.
    #[serde(default = "default_invoice_due_days")]
    pub invoice_due_days: i64,
}

fn default_discount_percent() -> f64 {
    0.0
}

fn default_tax_percent() -> f64 {
    8.5
}

fn default_duty_percent() -> f64 {
    2.0
}

fn default_gateway_timeout_secs() -> u64 {
    10
}

fn default_billing_concurrency() -> usize {
    8
}

fn default_dispute_review_days() -> i64 {
    7
}

fn default_invoice_due_days() -> i64 {
    14
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            default_discount_percent: default_discount_percent(),
            tax_percent: default_tax_percent(),
            duty_percent: default_duty_percent(),
            gateway_timeout_secs: default_gateway_timeout_secs(),
            billing_concurrency: default_billing_concurrency(),
            dispute_review_days: default_dispute_review_days(),
            invoice_due_days: default_invoice_due_days(),
        }
    }
}

impl BillingConfig {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("BILLING").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
