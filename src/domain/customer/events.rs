use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value_objects::{LoyaltyTransaction, TransactionStatus};
use crate::event_sourcing::core::DomainEvent;

// ============================================================================
// Customer Events - Loyalty Ledger
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum CustomerEvent {
    AccountOpened(LoyaltyAccountOpened),
    TransactionPosted(LoyaltyTransaction),
    TransactionStatusChanged(TransactionStatusChanged),
    PurchaseRecorded(PurchaseRecorded),
}

impl DomainEvent for CustomerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CustomerEvent::AccountOpened(_) => "LoyaltyAccountOpened",
            CustomerEvent::TransactionPosted(_) => "LoyaltyTransactionPosted",
            CustomerEvent::TransactionStatusChanged(_) => "LoyaltyTransactionStatusChanged",
            CustomerEvent::PurchaseRecorded(_) => "LoyaltyPurchaseRecorded",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LoyaltyAccountOpened {
    pub opened_at: DateTime<Utc>,
}

/// Ledger row flipped from active to used or expired
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TransactionStatusChanged {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub at: DateTime<Utc>,
}

/// Delivered order counted towards purchase statistics
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PurchaseRecorded {
    pub order_id: Uuid,
    pub amount: Decimal,
    pub at: DateTime<Utc>,
}
