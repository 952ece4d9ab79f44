use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

// ============================================================================
// Customer Commands - Loyalty Ledger Operations
// ============================================================================

#[derive(Debug, Clone)]
pub enum CustomerCommand {
    OpenAccount {
        at: DateTime<Utc>,
    },
    /// Delivered order; no-op if already awarded for this order
    AwardPoints {
        order_id: Uuid,
        amount: Decimal,
        at: DateTime<Utc>,
    },
    RedeemPoints {
        points: i64,
        order_id: Option<Uuid>,
        at: DateTime<Utc>,
    },
    ExpirePoints {
        at: DateTime<Utc>,
    },
    /// Give back points redeemed on a cancelled order
    RestoreRedeemedPoints {
        order_id: Uuid,
        points: i64,
        at: DateTime<Utc>,
    },
    /// Revoke points earned on a cancelled order
    RemoveEarnedPoints {
        order_id: Uuid,
        at: DateTime<Utc>,
    },
}
