use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::compensator::CancellationCompensator;
use crate::collaborators::CustomerNotification;
use crate::domain::order::{CartLine, OrderAggregate, OrderEvent, OrderStatus, VerificationCode};
use crate::event_sourcing::{OutboxDraft, OutboxEntry, StoreError};

// ============================================================================
// Side Effects - What a Transition Asks of the Outside World
// ============================================================================
//
// Planned from the committed events and written to the outbox in the same
// store write. Each effect is dispatched on its own, so one failing effect
// never holds back another.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SideEffect {
    NotifyCustomer(CustomerNotification),
    PurgeVerificationNotification {
        order_id: Uuid,
    },
    AdjustStock {
        order_id: Uuid,
        lines: Vec<CartLine>,
    },
    RestoreStock {
        order_id: Uuid,
        lines: Vec<CartLine>,
    },
    AwardLoyaltyPoints {
        customer_id: Uuid,
        order_id: Uuid,
        amount: Decimal,
    },
    RestoreRedeemedPoints {
        customer_id: Uuid,
        order_id: Uuid,
        points: i64,
    },
    RemoveEarnedPoints {
        customer_id: Uuid,
        order_id: Uuid,
    },
}

impl SideEffect {
    pub fn effect_type(&self) -> &'static str {
        match self {
            SideEffect::NotifyCustomer(_) => "NotifyCustomer",
            SideEffect::PurgeVerificationNotification { .. } => "PurgeVerificationNotification",
            SideEffect::AdjustStock { .. } => "AdjustStock",
            SideEffect::RestoreStock { .. } => "RestoreStock",
            SideEffect::AwardLoyaltyPoints { .. } => "AwardLoyaltyPoints",
            SideEffect::RestoreRedeemedPoints { .. } => "RestoreRedeemedPoints",
            SideEffect::RemoveEarnedPoints { .. } => "RemoveEarnedPoints",
        }
    }

    pub fn to_draft(&self) -> Result<OutboxDraft, StoreError> {
        Ok(OutboxDraft {
            effect_type: self.effect_type().to_string(),
            payload: serde_json::to_string(self)?,
        })
    }

    pub fn from_entry(entry: &OutboxEntry) -> Result<Self, StoreError> {
        Ok(serde_json::from_str(&entry.payload)?)
    }

    fn notify(order: &OrderAggregate, status: OrderStatus, verification_code: Option<VerificationCode>) -> Self {
        SideEffect::NotifyCustomer(CustomerNotification {
            customer_id: order.customer_id,
            order_id: order.id,
            status,
            invoice: order.invoice,
            verification_code,
        })
    }
}

/// Effects for the events of one committed order transition, in dispatch order
pub fn order_effects(order: &OrderAggregate, events: &[OrderEvent]) -> Vec<SideEffect> {
    let mut effects = Vec::new();

    for event in events {
        match event {
            OrderEvent::Placed(e) => {
                effects.push(SideEffect::notify(
                    order,
                    OrderStatus::Received,
                    Some(e.verification_code.clone()),
                ));
            }
            OrderEvent::MarkedPending(_) => {
                effects.push(SideEffect::notify(order, OrderStatus::Pending, None));
            }
            OrderEvent::ProcessingStarted(_) => {
                effects.push(SideEffect::notify(order, OrderStatus::Processing, None));
            }
            OrderEvent::CollectionUpdated(_) => {}
            OrderEvent::DispatchedForDelivery(_) => {
                effects.push(SideEffect::notify(order, OrderStatus::OutForDelivery, None));
            }
            OrderEvent::Delivered(_) => {
                effects.push(SideEffect::AdjustStock {
                    order_id: order.id,
                    lines: order.cart.clone(),
                });
                effects.push(SideEffect::AwardLoyaltyPoints {
                    customer_id: order.customer_id,
                    order_id: order.id,
                    amount: order.totals.qualifying_amount(),
                });
                effects.push(SideEffect::notify(order, OrderStatus::Delivered, None));
                effects.push(SideEffect::PurgeVerificationNotification { order_id: order.id });
            }
            OrderEvent::Cancelled(e) => {
                effects.extend(CancellationCompensator::plan(order, e.previous_status));
                effects.push(SideEffect::notify(order, OrderStatus::Cancelled, None));
                effects.push(SideEffect::PurgeVerificationNotification { order_id: order.id });
            }
        }
    }

    effects
}

/// Outbox plan handed to the order command handler
pub fn plan_order_effects(order: &OrderAggregate, events: &[OrderEvent]) -> Result<Vec<OutboxDraft>, StoreError> {
    order_effects(order, events).iter().map(SideEffect::to_draft).collect()
}
