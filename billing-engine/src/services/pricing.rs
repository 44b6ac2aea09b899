//! Volume-tier resolution and charge computation.

use crate::models::{ChargeAmounts, ChargeRequest, PricingTier};
use crate::store::BillingStore;
use anyhow::anyhow;
use chrono::NaiveDate;
use engine_core::config::BillingConfig;
use engine_core::error::AppError;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument};
use validator::Validate;

/// Divisor for volumetric weight: cm^3 per chargeable kg.
const VOLUMETRIC_DIVISOR: Decimal = Decimal::from_parts(5000, 0, 0, false, 0);

const HUNDRED: Decimal = Decimal::from_parts(100, 0, 0, false, 0);

/// Computes shipment and subscription charges.
///
/// Leaf component: reads pricing tiers from the store but never mutates
/// anything.
#[derive(Clone)]
pub struct PricingEngine {
    store: Arc<dyn BillingStore>,
    config: BillingConfig,
}

/// Pick the matching tier with the greatest `min_monthly_volume`.
fn select_tier(tiers: &[PricingTier], monthly_volume: i64, as_of: NaiveDate) -> Option<&PricingTier> {
    tiers
        .iter()
        .filter(|t| t.matches(monthly_volume, as_of))
        .max_by_key(|t| t.min_monthly_volume)
}

impl PricingEngine {
    pub fn new(store: Arc<dyn BillingStore>, config: BillingConfig) -> Self {
        Self { store, config }
    }

    /// Resolve the pricing tier for a customer's monthly shipment volume.
    #[instrument(skip(self))]
    pub async fn resolve_tier(
        &self,
        monthly_volume: i64,
        as_of: NaiveDate,
    ) -> Result<PricingTier, AppError> {
        let tiers = self.store.list_tiers().await?;
        select_tier(&tiers, monthly_volume, as_of)
            .cloned()
            .ok_or_else(|| {
                AppError::NoTierFound(anyhow!(
                    "No pricing tier matches volume {} as of {}",
                    monthly_volume,
                    as_of
                ))
            })
    }

    /// Discount percent for the volume, falling back to the configured
    /// default when no tier matches.
    async fn discount_percent(
        &self,
        monthly_volume: i64,
        as_of: NaiveDate,
    ) -> Result<Decimal, AppError> {
        match self.resolve_tier(monthly_volume, as_of).await {
            Ok(tier) => Ok(tier.discount_percent),
            Err(AppError::NoTierFound(_)) => {
                Ok(Decimal::from_f64(self.config.default_discount_percent).unwrap_or_default())
            }
            Err(e) => Err(e),
        }
    }

    fn tax_percent(&self) -> Decimal {
        Decimal::from_f64(self.config.tax_percent).unwrap_or_default()
    }

    fn duty_percent(&self) -> Decimal {
        Decimal::from_f64(self.config.duty_percent).unwrap_or_default()
    }

    /// Apply discount and tax over a subtotal. All components are rounded to
    /// the currency minor unit before the total is summed, so the breakdown
    /// always adds up exactly.
    fn apply_rates(&self, subtotal: Decimal, discount_percent: Decimal) -> ChargeAmounts {
        let subtotal = subtotal.round_dp(2);
        let discount = (subtotal * discount_percent / HUNDRED).round_dp(2);
        let tax = ((subtotal - discount) * self.tax_percent() / HUNDRED).round_dp(2);
        ChargeAmounts {
            subtotal,
            discount,
            tax,
            total: subtotal - discount + tax,
        }
    }

    /// Compute the charge breakdown for a shipment.
    ///
    /// Base amount is the service rate times chargeable weight, where
    /// chargeable weight is the greater of actual and volumetric weight
    /// (`l*w*h / 5000`). Cross-border shipments add an ad-valorem duty on
    /// the declared value. The result is advisory pricing, exact to the
    /// currency minor unit.
    #[instrument(skip(self, req), fields(customer_id = %req.customer_id, service = req.service_type.as_str()))]
    pub async fn calculate_charges(
        &self,
        req: &ChargeRequest,
        as_of: NaiveDate,
    ) -> Result<ChargeAmounts, AppError> {
        req.validate()?;
        req.check_amounts()
            .map_err(|msg| AppError::BadRequest(anyhow!(msg)))?;

        let volumetric = req.length_cm * req.width_cm * req.height_cm / VOLUMETRIC_DIVISOR;
        let chargeable = req.weight_kg.max(volumetric);
        let mut base = chargeable * req.service_type.rate_per_kg();

        if !req.origin.eq_ignore_ascii_case(&req.destination) {
            base += req.declared_value * self.duty_percent() / HUNDRED;
        }

        let discount_percent = self.discount_percent(req.monthly_volume, as_of).await?;
        let amounts = self.apply_rates(base, discount_percent);

        info!(
            subtotal = %amounts.subtotal,
            discount = %amounts.discount,
            tax = %amounts.tax,
            total = %amounts.total,
            "Shipment charges calculated"
        );
        Ok(amounts)
    }

    /// Price one billing period of a subscription: the recurring base amount
    /// run through the same discount/tax pipeline as shipment charges.
    #[instrument(skip(self))]
    pub async fn price_subscription(
        &self,
        base_amount: Decimal,
        monthly_volume: i64,
        as_of: NaiveDate,
    ) -> Result<ChargeAmounts, AppError> {
        if base_amount.is_sign_negative() {
            return Err(AppError::BadRequest(anyhow!(
                "Subscription base amount must not be negative"
            )));
        }
        let discount_percent = self.discount_percent(monthly_volume, as_of).await?;
        Ok(self.apply_rates(base_amount, discount_percent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn tier(name: &str, min: i64, max: Option<i64>, discount: Decimal) -> PricingTier {
        PricingTier {
            name: name.to_string(),
            min_monthly_volume: min,
            max_monthly_volume: max,
            active: true,
            effective_from: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            effective_until: None,
            discount_percent: discount,
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn test_select_tier_prefers_highest_band() {
        let as_of = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let tiers = vec![
            tier("basic", 0, Some(999), Decimal::new(0, 0)),
            tier("volume", 1000, None, Decimal::new(10, 0)),
        ];

        let t = select_tier(&tiers, 500, as_of).unwrap();
        assert_eq!(t.name, "basic");

        let t = select_tier(&tiers, 1000, as_of).unwrap();
        assert_eq!(t.name, "volume");

        let t = select_tier(&tiers, 50_000, as_of).unwrap();
        assert_eq!(t.name, "volume");
    }

    #[test]
    fn test_select_tier_respects_effective_window() {
        let mut expired = tier("old", 0, None, Decimal::new(5, 0));
        expired.effective_until = NaiveDate::from_ymd_opt(2024, 12, 31);
        let tiers = vec![expired];

        let as_of = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        assert!(select_tier(&tiers, 100, as_of).is_none());
    }

    #[test]
    fn test_select_tier_ignores_inactive() {
        let mut inactive = tier("disabled", 0, None, Decimal::new(5, 0));
        inactive.active = false;
        let tiers = vec![inactive];

        let as_of = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        assert!(select_tier(&tiers, 100, as_of).is_none());
    }
}
