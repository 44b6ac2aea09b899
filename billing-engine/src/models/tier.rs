//! Pricing tier model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Volume-based pricing band.
///
/// Identity is the tier name. Active tiers are treated as non-overlapping
/// over their volume ranges at any instant; selection takes the tier with
/// the greatest `min_monthly_volume` at or below the queried volume.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PricingTier {
    pub name: String,
    pub min_monthly_volume: i64,
    /// Unset means unbounded.
    pub max_monthly_volume: Option<i64>,
    pub active: bool,
    pub effective_from: NaiveDate,
    /// Unset means open-ended.
    pub effective_until: Option<NaiveDate>,
    /// Percentage discount applied to the charge subtotal, 0..100.
    pub discount_percent: Decimal,
    pub created_utc: DateTime<Utc>,
}

impl PricingTier {
    /// Whether this tier applies to the given volume on the given date.
    pub fn matches(&self, monthly_volume: i64, as_of: NaiveDate) -> bool {
        if !self.active {
            return false;
        }
        if self.effective_from > as_of {
            return false;
        }
        if let Some(until) = self.effective_until {
            if until < as_of {
                return false;
            }
        }
        if monthly_volume < self.min_monthly_volume {
            return false;
        }
        match self.max_monthly_volume {
            Some(max) => monthly_volume <= max,
            None => true,
        }
    }
}
