use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use super::checklist::{generate_checklist, DeliveryInfo};
use super::commands::OrderCommand;
use super::errors::OrderError;
use super::events::*;
use super::value_objects::{CancelledBy, CartLine, OrderStatus, OrderTotals};
use super::verification::VerificationCode;
use crate::event_sourcing::core::Aggregate;

// ============================================================================
// Order Aggregate - Domain Logic
// ============================================================================
//
// Received -> Pending -> Processing -> Out for Delivery -> Delivered
// (any open status) -> Cancel
//
// Guards:
// - dispatch needs every checklist item collected
// - delivery needs the matching, unused verification code
// - Delivered and Cancel are terminal, cancelling again is an error
//
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderAggregate {
    // Identity
    pub id: Uuid,
    pub version: i64,
    pub invoice: u64,
    pub customer_id: Uuid,

    pub cart: Vec<CartLine>,
    pub totals: OrderTotals,
    pub status: OrderStatus,

    pub verification_code: VerificationCode,
    pub verification_code_used: bool,
    pub delivery: DeliveryInfo,

    // Set only on transition into Cancel
    pub cancel_reason: Option<String>,
    pub cancelled_by: Option<CancelledBy>,
    pub cancelled_at: Option<DateTime<Utc>>,

    // Audit Trail
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderAggregate {
    pub fn validate_cart(cart: &[CartLine], totals: &OrderTotals) -> Result<(), OrderError> {
        if cart.is_empty() {
            return Err(OrderError::EmptyCart);
        }

        // One checklist entry per product
        let mut seen = HashSet::with_capacity(cart.len());
        for line in cart {
            if !seen.insert(line.product_id) {
                return Err(OrderError::DuplicateCartLine(line.product_id));
            }
            if line.quantity == 0 || line.pack_qty == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: line.product_id,
                    quantity: line.quantity,
                });
            }
            if line.unit_price < Decimal::ZERO {
                return Err(OrderError::InvalidAmount(format!(
                    "negative unit price for {}",
                    line.title
                )));
            }
        }

        if totals.shipping_cost < Decimal::ZERO {
            return Err(OrderError::InvalidAmount("negative shipping cost".to_string()));
        }
        if totals.discount < Decimal::ZERO || totals.discount > totals.sub_total + totals.shipping_cost {
            return Err(OrderError::InvalidAmount("discount out of range".to_string()));
        }
        if totals.loyalty_points_used < 0 || totals.total < Decimal::ZERO {
            return Err(OrderError::InvalidAmount("loyalty discount exceeds order amount".to_string()));
        }

        Ok(())
    }

    fn ensure_transition(&self, to: OrderStatus) -> Result<(), OrderError> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(OrderError::IllegalTransition { from: self.status, to })
        }
    }

    pub fn is_assigned_to(&self, driver_id: Uuid) -> bool {
        self.delivery.assigned_driver == Some(driver_id)
    }
}

// ============================================================================
// Aggregate Trait Implementation
// ============================================================================

impl Aggregate for OrderAggregate {
    type Event = OrderEvent;
    type Command = OrderCommand;
    type Error = OrderError;

    const AGGREGATE_TYPE: &'static str = "Order";

    fn apply_first_event(aggregate_id: Uuid, event: &Self::Event) -> Result<Self, Self::Error> {
        match event {
            OrderEvent::Placed(e) => Ok(Self {
                id: aggregate_id,
                version: 0,
                invoice: e.invoice,
                customer_id: e.customer_id,
                cart: e.cart.clone(),
                totals: e.totals.clone(),
                status: OrderStatus::Received,
                verification_code: e.verification_code.clone(),
                verification_code_used: false,
                delivery: DeliveryInfo {
                    product_checklist: e.checklist.clone(),
                    ..DeliveryInfo::default()
                },
                cancel_reason: None,
                cancelled_by: None,
                cancelled_at: None,
                created_at: e.placed_at,
                updated_at: e.placed_at,
            }),
            _ => Err(OrderError::NotInitialized),
        }
    }

    fn apply_event(&mut self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            OrderEvent::Placed(_) => return Err(OrderError::AlreadyPlaced),
            OrderEvent::MarkedPending(e) => {
                self.status = OrderStatus::Pending;
                self.updated_at = e.at;
            }
            OrderEvent::ProcessingStarted(e) => {
                self.status = OrderStatus::Processing;
                self.delivery.assigned_driver = Some(e.driver_id);
                self.delivery.assigned_at = Some(e.assigned_at);
                if let Some(checklist) = &e.checklist {
                    self.delivery.product_checklist = checklist.clone();
                }
                self.updated_at = e.assigned_at;
            }
            OrderEvent::CollectionUpdated(e) => {
                if !self.delivery.record_collection(
                    e.product_id,
                    e.collected,
                    e.collected_by,
                    e.notes.clone(),
                    e.at,
                ) {
                    return Err(OrderError::ProductNotInChecklist(e.product_id));
                }
                self.updated_at = e.at;
            }
            OrderEvent::DispatchedForDelivery(e) => {
                self.status = OrderStatus::OutForDelivery;
                self.delivery.out_for_delivery_at = Some(e.at);
                if e.notes.is_some() {
                    self.delivery.delivery_notes = e.notes.clone();
                }
                self.updated_at = e.at;
            }
            OrderEvent::Delivered(e) => {
                self.status = OrderStatus::Delivered;
                self.verification_code_used = true;
                self.delivery.delivered_at = Some(e.delivered_at);
                self.updated_at = e.delivered_at;
            }
            OrderEvent::Cancelled(e) => {
                self.status = OrderStatus::Cancelled;
                self.cancel_reason = e.reason.clone();
                self.cancelled_by = Some(e.cancelled_by);
                self.cancelled_at = Some(e.cancelled_at);
                self.updated_at = e.cancelled_at;
            }
        }
        Ok(())
    }

    fn handle_command(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder { .. } => Err(OrderError::AlreadyPlaced),

            OrderCommand::MarkPending { at } => {
                self.ensure_transition(OrderStatus::Pending)?;
                Ok(vec![OrderEvent::MarkedPending(OrderMarkedPending { at: *at })])
            }

            OrderCommand::StartProcessing { driver_id, at } => {
                self.ensure_transition(OrderStatus::Processing)?;

                let checklist = if self.delivery.product_checklist.is_empty() {
                    Some(generate_checklist(&self.cart))
                } else {
                    None
                };

                Ok(vec![OrderEvent::ProcessingStarted(OrderProcessingStarted {
                    driver_id: *driver_id,
                    assigned_at: *at,
                    checklist,
                })])
            }

            OrderCommand::UpdateCollection { product_id, collected, collected_by, notes, at } => {
                if self.status != OrderStatus::Processing {
                    return Err(OrderError::InvalidOrderState(self.status));
                }
                if !self.delivery.contains(*product_id) {
                    return Err(OrderError::ProductNotInChecklist(*product_id));
                }

                Ok(vec![OrderEvent::CollectionUpdated(ItemCollectionUpdated {
                    product_id: *product_id,
                    collected: *collected,
                    collected_by: *collected_by,
                    notes: notes.clone(),
                    at: *at,
                })])
            }

            OrderCommand::DispatchForDelivery { notes, at } => {
                self.ensure_transition(OrderStatus::OutForDelivery)?;
                if !self.delivery.all_items_collected {
                    return Err(OrderError::ChecklistIncomplete(self.delivery.uncollected()));
                }

                Ok(vec![OrderEvent::DispatchedForDelivery(OrderDispatched {
                    notes: notes.clone(),
                    at: *at,
                })])
            }

            OrderCommand::ConfirmDelivery { code, at } => {
                if self.verification_code_used {
                    return Err(OrderError::CodeAlreadyUsed);
                }
                self.ensure_transition(OrderStatus::Delivered)?;
                if !self.verification_code.matches(code) {
                    return Err(OrderError::InvalidVerificationCode);
                }

                Ok(vec![OrderEvent::Delivered(OrderDelivered { delivered_at: *at })])
            }

            OrderCommand::Cancel { reason, cancelled_by, at } => {
                if self.status == OrderStatus::Cancelled {
                    return Err(OrderError::AlreadyCancelled);
                }
                self.ensure_transition(OrderStatus::Cancelled)?;

                Ok(vec![OrderEvent::Cancelled(OrderCancelled {
                    reason: reason.clone(),
                    cancelled_by: *cancelled_by,
                    previous_status: self.status,
                    cancelled_at: *at,
                })])
            }
        }
    }

    fn handle_new(_aggregate_id: Uuid, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder { invoice, customer_id, cart, totals, verification_code, at } => {
                Self::validate_cart(cart, totals)?;

                Ok(vec![OrderEvent::Placed(OrderPlaced {
                    invoice: *invoice,
                    customer_id: *customer_id,
                    cart: cart.clone(),
                    totals: totals.clone(),
                    verification_code: verification_code.clone(),
                    checklist: generate_checklist(cart),
                    placed_at: *at,
                })])
            }
            _ => Err(OrderError::NotInitialized),
        }
    }

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
