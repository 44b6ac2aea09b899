//! Billing dispute model.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Dispute status lifecycle:
/// under_review -> {awaiting_customer_response, awaiting_internal_response}
/// -> {resolved_customer_favor, resolved_merchant_favor, closed_no_resolution}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    UnderReview,
    AwaitingCustomerResponse,
    AwaitingInternalResponse,
    ResolvedCustomerFavor,
    ResolvedMerchantFavor,
    ClosedNoResolution,
}

impl DisputeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeStatus::UnderReview => "under_review",
            DisputeStatus::AwaitingCustomerResponse => "awaiting_customer_response",
            DisputeStatus::AwaitingInternalResponse => "awaiting_internal_response",
            DisputeStatus::ResolvedCustomerFavor => "resolved_customer_favor",
            DisputeStatus::ResolvedMerchantFavor => "resolved_merchant_favor",
            DisputeStatus::ClosedNoResolution => "closed_no_resolution",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "awaiting_customer_response" => DisputeStatus::AwaitingCustomerResponse,
            "awaiting_internal_response" => DisputeStatus::AwaitingInternalResponse,
            "resolved_customer_favor" => DisputeStatus::ResolvedCustomerFavor,
            "resolved_merchant_favor" => DisputeStatus::ResolvedMerchantFavor,
            "closed_no_resolution" => DisputeStatus::ClosedNoResolution,
            _ => DisputeStatus::UnderReview,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DisputeStatus::ResolvedCustomerFavor
                | DisputeStatus::ResolvedMerchantFavor
                | DisputeStatus::ClosedNoResolution
        )
    }
}

/// Dispute row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillingDispute {
    pub dispute_id: Uuid,
    pub dispute_number: String,
    pub customer_id: Uuid,
    pub invoice_number: String,
    pub reason: String,
    pub status: String,
    /// Deadline for the next action on this dispute.
    pub due_date: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
    pub resolved_utc: Option<DateTime<Utc>>,
    pub resolution_amount: Option<Decimal>,
    pub resolution_note: Option<String>,
}

impl BillingDispute {
    pub fn status(&self) -> DisputeStatus {
        DisputeStatus::from_string(&self.status)
    }
}

/// Generate a unique human-readable dispute number.
pub fn generate_dispute_number(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|c| (c as char).to_ascii_uppercase())
        .collect();
    format!("DSP-{}-{}", now.format("%Y%m%d"), suffix)
}
