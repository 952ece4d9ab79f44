use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::value_objects::{CancelledBy, CartLine, OrderTotals};
use super::verification::VerificationCode;

// ============================================================================
// Order Commands - Represent user intent
// ============================================================================
//
// Every command carries the time it was issued so replaying a command after
// a version conflict stamps the same instant.
//
// ============================================================================

#[derive(Debug, Clone)]
pub enum OrderCommand {
    PlaceOrder {
        invoice: u64,
        customer_id: Uuid,
        cart: Vec<CartLine>,
        totals: OrderTotals,
        verification_code: VerificationCode,
        at: DateTime<Utc>,
    },
    MarkPending {
        at: DateTime<Utc>,
    },
    StartProcessing {
        driver_id: Uuid,
        at: DateTime<Utc>,
    },
    UpdateCollection {
        product_id: Uuid,
        collected: bool,
        collected_by: Option<Uuid>,
        notes: Option<String>,
        at: DateTime<Utc>,
    },
    DispatchForDelivery {
        notes: Option<String>,
        at: DateTime<Utc>,
    },
    ConfirmDelivery {
        code: String,
        at: DateTime<Utc>,
    },
    Cancel {
        reason: Option<String>,
        cancelled_by: CancelledBy,
        at: DateTime<Utc>,
    },
}
