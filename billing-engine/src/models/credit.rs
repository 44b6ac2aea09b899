//! Customer credit balance model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One credit balance per customer. Mutated only by dispute resolutions and
/// credit redemption during settlement.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CustomerCredit {
    pub customer_id: Uuid,
    pub balance: Decimal,
    pub currency: String,
    pub updated_utc: DateTime<Utc>,
}

impl CustomerCredit {
    pub fn new(customer_id: Uuid, currency: &str, now: DateTime<Utc>) -> Self {
        Self {
            customer_id,
            balance: Decimal::ZERO,
            currency: currency.to_string(),
            updated_utc: now,
        }
    }
}
