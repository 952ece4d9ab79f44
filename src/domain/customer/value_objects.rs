use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Loyalty Value Objects
// ============================================================================

/// Running balance. `current` is redeemable, `total` lifetime earned,
/// `used` lifetime redeemed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoyaltyPoints {
    pub current: i64,
    pub total: i64,
    pub used: i64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PurchaseStats {
    pub order_count: u64,
    pub total_spent: Decimal,
    pub average_order_value: Decimal,
}

impl PurchaseStats {
    pub fn record(&mut self, amount: Decimal) {
        self.order_count += 1;
        self.total_spent += amount;
        self.average_order_value = (self.total_spent / Decimal::from(self.order_count)).round_dp(2);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Earned,
    Bonus,
    Redeemed,
    Refund,
    Expired,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Earned => "earned",
            TransactionType::Bonus => "bonus",
            TransactionType::Redeemed => "redeemed",
            TransactionType::Refund => "refund",
            TransactionType::Expired => "expired",
        }
    }

    /// Rows that carry an expiry date and can be expired or revoked
    pub fn is_accrual(&self) -> bool {
        matches!(self, TransactionType::Earned | TransactionType::Bonus)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Active,
    Used,
    Expired,
}

/// Append-only ledger row. Only `status` ever changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoyaltyTransaction {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub kind: TransactionType,
    /// Signed: positive credits, negative debits
    pub points: i64,
    pub description: String,
    pub order_id: Option<Uuid>,
    pub balance_after: i64,
    pub expiry_date: Option<DateTime<Utc>>,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

impl LoyaltyTransaction {
    pub fn is_expirable_at(&self, now: DateTime<Utc>) -> bool {
        self.kind.is_accrual()
            && self.status == TransactionStatus::Active
            && self.expiry_date.is_some_and(|expiry| expiry < now)
    }
}

impl LoyaltyPoints {
    /// Balance movement caused by one posted row
    pub fn post(&mut self, kind: TransactionType, points: i64) {
        match kind {
            TransactionType::Earned | TransactionType::Bonus => {
                self.current += points;
                self.total += points;
            }
            TransactionType::Redeemed => {
                self.current += points;
                self.used -= points;
            }
            TransactionType::Refund if points >= 0 => {
                self.current += points;
                self.used -= points;
            }
            TransactionType::Refund => {
                self.current += points;
                self.total += points;
            }
            TransactionType::Expired => {
                self.current += points;
            }
        }
    }

    /// Recompute a balance from scratch out of ledger rows
    pub fn replay<'a>(transactions: impl IntoIterator<Item = &'a LoyaltyTransaction>) -> Self {
        let mut points = Self::default();
        for tx in transactions {
            points.post(tx.kind, tx.points);
        }
        points
    }
}
