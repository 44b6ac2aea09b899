//! Invoice model and charge request/response types.

use chrono::{DateTime, NaiveDate, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Invoice type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceType {
    Shipment,
    Subscription,
}

impl InvoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceType::Shipment => "shipment",
            InvoiceType::Subscription => "subscription",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "subscription" => InvoiceType::Subscription,
            _ => InvoiceType::Shipment,
        }
    }
}

/// Invoice status lifecycle: draft -> sent -> {partially_paid -> paid} | cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    PartiallyPaid,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "sent" => InvoiceStatus::Sent,
            "partially_paid" => InvoiceStatus::PartiallyPaid,
            "paid" => InvoiceStatus::Paid,
            "cancelled" => InvoiceStatus::Cancelled,
            _ => InvoiceStatus::Draft,
        }
    }

    /// Paid and cancelled invoices accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceStatus::Paid | InvoiceStatus::Cancelled)
    }

    /// Whether a settlement may be applied in this state.
    pub fn accepts_settlement(&self) -> bool {
        matches!(self, InvoiceStatus::Sent | InvoiceStatus::PartiallyPaid)
    }
}

/// Invoice row.
///
/// Monetary fields satisfy `total = subtotal - discount + tax`; the total is
/// immutable once the invoice leaves draft. `version` backs the optimistic
/// concurrency check on every write.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub invoice_type: String,
    pub status: String,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub billing_line1: Option<String>,
    pub billing_city: Option<String>,
    pub billing_postal_code: Option<String>,
    pub billing_country: Option<String>,
    pub description: Option<String>,
    pub currency: String,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub due_date: NaiveDate,
    pub shipment_id: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
    pub created_by: String,
    pub updated_by: Option<String>,
    pub version: i64,
    pub created_utc: DateTime<Utc>,
    pub sent_utc: Option<DateTime<Utc>>,
    pub paid_utc: Option<DateTime<Utc>>,
    pub cancelled_utc: Option<DateTime<Utc>>,
}

impl Invoice {
    pub fn status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }

    pub fn invoice_type(&self) -> InvoiceType {
        InvoiceType::from_string(&self.invoice_type)
    }
}

/// Generate a globally unique human-readable invoice number.
pub fn generate_invoice_number(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|c| (c as char).to_ascii_uppercase())
        .collect();
    format!("INV-{}-{}", now.format("%Y%m%d"), suffix)
}

/// Courier service type used for base-rate derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Standard,
    Express,
    Overnight,
    International,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Standard => "standard",
            ServiceType::Express => "express",
            ServiceType::Overnight => "overnight",
            ServiceType::International => "international",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "express" => ServiceType::Express,
            "overnight" => ServiceType::Overnight,
            "international" => ServiceType::International,
            _ => ServiceType::Standard,
        }
    }

    /// Base shipping rate per chargeable kilogram, in currency minor-unit
    /// precision.
    pub fn rate_per_kg(&self) -> Decimal {
        match self {
            ServiceType::Standard => Decimal::new(250, 2),      // 2.50
            ServiceType::Express => Decimal::new(475, 2),       // 4.75
            ServiceType::Overnight => Decimal::new(800, 2),     // 8.00
            ServiceType::International => Decimal::new(620, 2), // 6.20
        }
    }
}

/// Charge computation input for a shipment.
#[derive(Debug, Clone, Validate)]
pub struct ChargeRequest {
    pub service_type: ServiceType,
    pub weight_kg: Decimal,
    pub length_cm: Decimal,
    pub width_cm: Decimal,
    pub height_cm: Decimal,
    #[validate(length(min = 1, message = "Origin cannot be empty"))]
    pub origin: String,
    #[validate(length(min = 1, message = "Destination cannot be empty"))]
    pub destination: String,
    pub declared_value: Decimal,
    pub customer_id: Uuid,
    /// Customer's shipment volume for the current month, used for tier
    /// resolution.
    pub monthly_volume: i64,
}

impl ChargeRequest {
    /// Monetary/measure inputs must be non-negative; validator's derive
    /// covers the string fields.
    pub fn check_amounts(&self) -> Result<(), String> {
        for (name, value) in [
            ("weight_kg", self.weight_kg),
            ("length_cm", self.length_cm),
            ("width_cm", self.width_cm),
            ("height_cm", self.height_cm),
            ("declared_value", self.declared_value),
        ] {
            if value.is_sign_negative() {
                return Err(format!("{} must not be negative", name));
            }
        }
        Ok(())
    }
}

/// Computed charge breakdown. `total = subtotal - discount + tax`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeAmounts {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// Input for creating an invoice.
#[derive(Debug, Clone, Validate)]
pub struct CreateInvoiceRequest {
    pub customer_id: Uuid,
    /// Optional; filled from the customer directory when absent.
    pub customer_name: Option<String>,
    #[validate(email(message = "Invalid customer email"))]
    pub customer_email: Option<String>,
    pub billing_line1: Option<String>,
    pub billing_city: Option<String>,
    pub billing_postal_code: Option<String>,
    pub billing_country: Option<String>,
    pub description: Option<String>,
    #[validate(length(min = 3, max = 3, message = "Currency must be a 3-letter code"))]
    pub currency: String,
    pub due_date: NaiveDate,
    pub invoice_type: InvoiceType,
    pub shipment_id: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
    #[validate(length(min = 1, message = "Performer identity is required"))]
    pub performed_by: String,
}

/// Descriptive fields that may change while an invoice is draft or sent.
/// Monetary fields are deliberately absent; the total is frozen at creation.
#[derive(Debug, Clone, Default)]
pub struct UpdateInvoiceFields {
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub billing_line1: Option<String>,
    pub billing_city: Option<String>,
    pub billing_postal_code: Option<String>,
    pub billing_country: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub currency: Option<String>,
}
