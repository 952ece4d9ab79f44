use super::effects::SideEffect;
use crate::domain::order::{OrderAggregate, OrderStatus};

/// Reverses stock and loyalty effects of a cancelled order.
///
/// Each compensation becomes its own outbox entry, so a failing stock restore
/// does not stop the loyalty refunds from running.
pub struct CancellationCompensator;

impl CancellationCompensator {
    /// Earned points are only revoked for orders cancelled before dispatch.
    ///
    /// Points are awarded on delivery and delivered orders cannot be
    /// cancelled, so in practice there is nothing to revoke here.
    pub fn revokes_earned_points(previous_status: OrderStatus) -> bool {
        matches!(previous_status, OrderStatus::Pending | OrderStatus::Processing)
    }

    pub fn plan(order: &OrderAggregate, previous_status: OrderStatus) -> Vec<SideEffect> {
        let mut effects = Vec::new();

        if !order.cart.is_empty() {
            effects.push(SideEffect::RestoreStock {
                order_id: order.id,
                lines: order.cart.clone(),
            });
        }

        if order.totals.loyalty_points_used > 0 {
            effects.push(SideEffect::RestoreRedeemedPoints {
                customer_id: order.customer_id,
                order_id: order.id,
                points: order.totals.loyalty_points_used,
            });
        }

        if Self::revokes_earned_points(previous_status) {
            effects.push(SideEffect::RemoveEarnedPoints {
                customer_id: order.customer_id,
                order_id: order.id,
            });
        }

        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fulfillment::test_support::order_in;

    fn types(effects: &[SideEffect]) -> Vec<&'static str> {
        effects.iter().map(SideEffect::effect_type).collect()
    }

    #[test]
    fn test_received_cancel_restores_stock_only() {
        let order = order_in(OrderStatus::Cancelled, 0);
        let effects = CancellationCompensator::plan(&order, OrderStatus::Received);
        assert_eq!(types(&effects), vec!["RestoreStock"]);
    }

    #[test]
    fn test_redeemed_points_refunded_from_any_open_status() {
        let order = order_in(OrderStatus::Cancelled, 120);

        for previous in [OrderStatus::Received, OrderStatus::OutForDelivery] {
            let effects = CancellationCompensator::plan(&order, previous);
            assert_eq!(types(&effects), vec!["RestoreStock", "RestoreRedeemedPoints"]);
        }

        match &CancellationCompensator::plan(&order, OrderStatus::Received)[1] {
            SideEffect::RestoreRedeemedPoints { points, .. } => assert_eq!(*points, 120),
            other => panic!("unexpected effect {:?}", other),
        }
    }

    #[test]
    fn test_earned_points_removal_only_before_dispatch() {
        assert!(CancellationCompensator::revokes_earned_points(OrderStatus::Pending));
        assert!(CancellationCompensator::revokes_earned_points(OrderStatus::Processing));
        assert!(!CancellationCompensator::revokes_earned_points(OrderStatus::Received));
        assert!(!CancellationCompensator::revokes_earned_points(OrderStatus::OutForDelivery));

        let order = order_in(OrderStatus::Cancelled, 0);
        let effects = CancellationCompensator::plan(&order, OrderStatus::Pending);
        assert_eq!(types(&effects), vec!["RestoreStock", "RemoveEarnedPoints"]);
    }
}
