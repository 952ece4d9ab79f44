use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::checklist::ChecklistItem;
use super::value_objects::{CancelledBy, CartLine, OrderStatus, OrderTotals};
use super::verification::VerificationCode;
use crate::event_sourcing::core::DomainEvent;

// ============================================================================
// Order Events - Domain Events for Order Aggregate
// ============================================================================

/// Order Event - Union type for all order events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    Placed(OrderPlaced),
    MarkedPending(OrderMarkedPending),
    ProcessingStarted(OrderProcessingStarted),
    CollectionUpdated(ItemCollectionUpdated),
    DispatchedForDelivery(OrderDispatched),
    Delivered(OrderDelivered),
    Cancelled(OrderCancelled),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::Placed(_) => "OrderPlaced",
            OrderEvent::MarkedPending(_) => "OrderMarkedPending",
            OrderEvent::ProcessingStarted(_) => "OrderProcessingStarted",
            OrderEvent::CollectionUpdated(_) => "OrderItemCollectionUpdated",
            OrderEvent::DispatchedForDelivery(_) => "OrderDispatchedForDelivery",
            OrderEvent::Delivered(_) => "OrderDelivered",
            OrderEvent::Cancelled(_) => "OrderCancelled",
        }
    }
}

impl OrderEvent {
    /// Status the order is in after this event, if it changes it
    pub fn resulting_status(&self) -> Option<OrderStatus> {
        match self {
            OrderEvent::Placed(_) => Some(OrderStatus::Received),
            OrderEvent::MarkedPending(_) => Some(OrderStatus::Pending),
            OrderEvent::ProcessingStarted(_) => Some(OrderStatus::Processing),
            OrderEvent::CollectionUpdated(_) => None,
            OrderEvent::DispatchedForDelivery(_) => Some(OrderStatus::OutForDelivery),
            OrderEvent::Delivered(_) => Some(OrderStatus::Delivered),
            OrderEvent::Cancelled(_) => Some(OrderStatus::Cancelled),
        }
    }
}

// ============================================================================
// Individual Event Types
// ============================================================================

/// Order Placed - enters Received with its code and checklist
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderPlaced {
    pub invoice: u64,
    pub customer_id: Uuid,
    pub cart: Vec<CartLine>,
    pub totals: OrderTotals,
    pub verification_code: VerificationCode,
    pub checklist: Vec<ChecklistItem>,
    pub placed_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderMarkedPending {
    pub at: DateTime<Utc>,
}

/// Driver assigned; `checklist` is only set when the order had none
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderProcessingStarted {
    pub driver_id: Uuid,
    pub assigned_at: DateTime<Utc>,
    pub checklist: Option<Vec<ChecklistItem>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ItemCollectionUpdated {
    pub product_id: Uuid,
    pub collected: bool,
    pub collected_by: Option<Uuid>,
    pub notes: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderDispatched {
    pub notes: Option<String>,
    pub at: DateTime<Utc>,
}

/// Order Delivered - verification code consumed
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderDelivered {
    pub delivered_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderCancelled {
    pub reason: Option<String>,
    pub cancelled_by: CancelledBy,
    pub previous_status: OrderStatus,
    pub cancelled_at: DateTime<Utc>,
}
