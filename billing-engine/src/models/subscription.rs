//! Subscription model.

use chrono::{DateTime, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "paused" => SubscriptionStatus::Paused,
            "cancelled" => SubscriptionStatus::Cancelled,
            "expired" => SubscriptionStatus::Expired,
            _ => SubscriptionStatus::Active,
        }
    }
}

/// Billing interval for subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Monthly,
    Quarterly,
    Annually,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Monthly => "monthly",
            BillingInterval::Quarterly => "quarterly",
            BillingInterval::Annually => "annually",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "quarterly" => BillingInterval::Quarterly,
            "annually" => BillingInterval::Annually,
            _ => BillingInterval::Monthly,
        }
    }

    /// Next billing date one period after `from`. End-of-month dates clamp
    /// the way `chrono::Months` does (Jan 31 + 1 month = Feb 28/29).
    pub fn advance(&self, from: NaiveDate) -> NaiveDate {
        let months = match self {
            BillingInterval::Monthly => 1,
            BillingInterval::Quarterly => 3,
            BillingInterval::Annually => 12,
        };
        from.checked_add_months(Months::new(months)).unwrap_or(from)
    }
}

/// Subscription row.
///
/// Only active subscriptions with `next_billing_date <= today` are eligible
/// for the billing cycle.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub subscription_id: Uuid,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub status: String,
    pub billing_interval: String,
    /// Recurring charge before tier discount and tax.
    pub base_amount: Decimal,
    /// Estimated shipment volume per month, used for tier resolution.
    pub monthly_volume: i64,
    pub currency: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub next_billing_date: NaiveDate,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Subscription {
    pub fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_string(&self.status)
    }

    pub fn billing_interval(&self) -> BillingInterval {
        BillingInterval::from_string(&self.billing_interval)
    }

    pub fn is_due(&self, as_of: NaiveDate) -> bool {
        self.status() == SubscriptionStatus::Active
            && self.next_billing_date <= as_of
            && self.end_date.map_or(true, |end| end >= as_of)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monthly_advance_clamps_end_of_month() {
        let from = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let next = BillingInterval::Monthly.advance(from);
        assert_eq!(next, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }

    #[test]
    fn quarterly_and_annual_advance() {
        let from = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(
            BillingInterval::Quarterly.advance(from),
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
        );
        assert_eq!(
            BillingInterval::Annually.advance(from),
            NaiveDate::from_ymd_opt(2025, 3, 15).unwrap()
        );
    }
}
