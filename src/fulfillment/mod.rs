// ============================================================================
// Fulfillment - Orchestration Across Orders, Loyalty and Collaborators
// ============================================================================
//
// - service     - client-facing operations and authorization
// - effects     - side effects planned from committed order events
// - compensator - what a cancellation has to undo
// - loyalty     - ledger operations over the customer aggregate
// - dispatcher  - runs one side effect against its collaborator
// - relay       - outbox claim / dispatch / retry / dead-letter
//
// ============================================================================

pub mod compensator;
pub mod dispatcher;
pub mod effects;
pub mod loyalty;
pub mod relay;
pub mod service;

pub use compensator::CancellationCompensator;
pub use dispatcher::{DispatchError, EffectDispatcher};
pub use effects::{order_effects, plan_order_effects, SideEffect};
pub use loyalty::{ExpirySweep, LoyaltyBalance, LoyaltyLedger, RedemptionReceipt};
pub use relay::{OutboxRelay, RelayReport};
pub use service::{Collaborators, FulfillmentService, PlaceOrderRequest, StatusChange};

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use crate::domain::order::{
        generate_checklist, CartLine, DeliveryInfo, OrderAggregate, OrderStatus, OrderTotals, VerificationCode,
    };

    /// An order already sitting in `status`, bypassing the command path
    pub fn order_in(status: OrderStatus, points_used: i64) -> OrderAggregate {
        let cart = vec![
            CartLine::new(Uuid::new_v4(), "Basmati rice 5kg", 2, Decimal::new(7500, 2)),
            CartLine::new(Uuid::new_v4(), "Ghee 1L", 1, Decimal::new(10000, 2)),
        ];
        let loyalty_discount = Decimal::from(points_used) * Decimal::new(1, 2);
        let totals = OrderTotals::compute(&cart, Decimal::ZERO, Decimal::ZERO, points_used, loyalty_discount);
        let now = Utc::now();

        OrderAggregate {
            id: Uuid::new_v4(),
            version: 1,
            invoice: 10_001,
            customer_id: Uuid::new_v4(),
            delivery: DeliveryInfo {
                product_checklist: generate_checklist(&cart),
                ..DeliveryInfo::default()
            },
            cart,
            totals,
            status,
            verification_code: VerificationCode::generate(),
            verification_code_used: status == OrderStatus::Delivered,
            cancel_reason: None,
            cancelled_by: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
