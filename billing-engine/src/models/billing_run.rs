//! Billing run report model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One failed subscription within a billing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingFailure {
    pub subscription_id: Uuid,
    pub error: String,
}

/// Outcome of one `run_billing_cycle` invocation. The run is best-effort:
/// failures are itemized per subscription and never abort the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingRunReport {
    pub run_id: Uuid,
    pub started_utc: DateTime<Utc>,
    pub finished_utc: DateTime<Utc>,
    /// Invoice numbers created during this run.
    pub invoices_created: Vec<String>,
    pub failures: Vec<BillingFailure>,
}

impl BillingRunReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}
