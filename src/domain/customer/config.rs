use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

// ============================================================================
// Loyalty Program Parameters
// ============================================================================
//
// Fixed program constants. Not read from the environment.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BonusTier {
    pub threshold: Decimal,
    pub points: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoyaltyConfig {
    pub points_per_currency_unit: i64,
    /// Currency value of one point when redeemed
    pub point_value: Decimal,
    pub minimum_redemption: i64,
    pub points_expiry_days: i64,
    /// Highest threshold first
    pub bonus_tiers: Vec<BonusTier>,
}

impl Default for LoyaltyConfig {
    fn default() -> Self {
        Self {
            points_per_currency_unit: 1,
            point_value: Decimal::new(1, 2),
            minimum_redemption: 100,
            points_expiry_days: 365,
            bonus_tiers: vec![
                BonusTier { threshold: Decimal::from(2000), points: 400 },
                BonusTier { threshold: Decimal::from(1000), points: 150 },
                BonusTier { threshold: Decimal::from(500), points: 50 },
            ],
        }
    }
}

impl LoyaltyConfig {
    /// floor(amount × points per unit); negative amounts earn nothing
    pub fn base_points(&self, amount: Decimal) -> i64 {
        (amount * Decimal::from(self.points_per_currency_unit))
            .floor()
            .to_i64()
            .unwrap_or(0)
            .max(0)
    }

    /// Highest qualifying tier only
    pub fn bonus_tier(&self, amount: Decimal) -> Option<BonusTier> {
        self.bonus_tiers
            .iter()
            .copied()
            .filter(|tier| amount >= tier.threshold)
            .max_by_key(|tier| tier.threshold)
    }

    pub fn bonus_points(&self, amount: Decimal) -> i64 {
        self.bonus_tier(amount).map(|tier| tier.points).unwrap_or(0)
    }

    pub fn discount_for(&self, points: i64) -> Decimal {
        Decimal::from(points) * self.point_value
    }
}
