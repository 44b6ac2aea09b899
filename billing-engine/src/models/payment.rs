//! Payment model.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Payment method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Manual,
    CreditCard,
    BankTransfer,
    Credit,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Manual => "manual",
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Credit => "credit",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "credit_card" => PaymentMethod::CreditCard,
            "bank_transfer" => PaymentMethod::BankTransfer,
            "credit" => PaymentMethod::Credit,
            _ => PaymentMethod::Manual,
        }
    }
}

/// Payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "completed" => PaymentStatus::Completed,
            "failed" => PaymentStatus::Failed,
            "refunded" => PaymentStatus::Refunded,
            _ => PaymentStatus::Pending,
        }
    }
}

/// Payment row. Rows are never deleted; refunds are new rows pointing at the
/// original via `original_payment_id`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub payment_id: Uuid,
    pub reference: String,
    pub invoice_number: String,
    pub customer_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub method: String,
    pub status: String,
    pub gateway_transaction_id: Option<String>,
    pub original_payment_id: Option<Uuid>,
    pub memo: Option<String>,
    pub performed_by: String,
    pub processed_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}

impl Payment {
    pub fn status(&self) -> PaymentStatus {
        PaymentStatus::from_string(&self.status)
    }

    pub fn method(&self) -> PaymentMethod {
        PaymentMethod::from_string(&self.method)
    }

    pub fn is_refund(&self) -> bool {
        self.original_payment_id.is_some()
    }

    /// Completed, non-refund payments count toward settlement.
    pub fn counts_toward_balance(&self) -> bool {
        self.status() == PaymentStatus::Completed && !self.is_refund()
    }
}

/// Generate an external payment reference.
pub fn generate_payment_reference(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|c| (c as char).to_ascii_uppercase())
        .collect();
    format!("PAY-{}-{}", now.format("%Y%m%d"), suffix)
}
