use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use super::dispatcher::EffectDispatcher;
use super::effects::plan_order_effects;
use super::loyalty::{LoyaltyBalance, LoyaltyLedger};
use super::relay::OutboxRelay;
use crate::clock::Clock;
use crate::collaborators::{InventoryService, Notifier};
use crate::domain::customer::{LoyaltyError, LoyaltyTransaction};
use crate::domain::order::{
    CancelledBy, CartLine, OrderAggregate, OrderCommand, OrderCommandHandler, OrderStatus, OrderTotals, Requester,
    VerificationCode,
};
use crate::error::FulfillmentError;
use crate::event_sourcing::{DeadLetter, EventStore, InvoiceSequence, OutboxStore};
use crate::metrics::Metrics;
use crate::utils::RetryConfig;

// ============================================================================
// Fulfillment Service - Client-Facing Operations
// ============================================================================
//
// Request → Authorize → Order Command (CAS) → Outbox → Inline Dispatch
//
// The transition is committed before any side effect runs. Side effects are
// dispatched once inline; whatever fails is left to the background relay
// and never undoes the transition.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PlaceOrderRequest {
    pub customer_id: Uuid,
    pub cart: Vec<CartLine>,
    pub shipping_cost: Decimal,
    pub discount: Decimal,
    /// Loyalty points to spend on this order, 0 for none
    pub redeem_points: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusChange {
    Pending,
    Processing { driver_id: Uuid },
    OutForDelivery { notes: Option<String> },
    Delivered { verification_code: String },
    Cancel { reason: Option<String> },
}

impl StatusChange {
    pub fn target(&self) -> OrderStatus {
        match self {
            StatusChange::Pending => OrderStatus::Pending,
            StatusChange::Processing { .. } => OrderStatus::Processing,
            StatusChange::OutForDelivery { .. } => OrderStatus::OutForDelivery,
            StatusChange::Delivered { .. } => OrderStatus::Delivered,
            StatusChange::Cancel { .. } => OrderStatus::Cancelled,
        }
    }

    fn action(&self) -> &'static str {
        match self {
            StatusChange::Pending => "mark orders pending",
            StatusChange::Processing { .. } => "assign drivers",
            StatusChange::OutForDelivery { .. } => "dispatch this order",
            StatusChange::Delivered { .. } => "confirm delivery of this order",
            StatusChange::Cancel { .. } => "cancel this order",
        }
    }
}

pub struct Collaborators {
    pub inventory: Arc<dyn InventoryService>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Clone)]
pub struct FulfillmentService {
    orders: OrderCommandHandler,
    ledger: LoyaltyLedger,
    invoices: Arc<dyn InvoiceSequence>,
    relay: OutboxRelay,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
}

impl FulfillmentService {
    pub fn new<S>(
        store: Arc<S>,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
        relay_retry: RetryConfig,
    ) -> Self
    where
        S: EventStore + OutboxStore + InvoiceSequence + 'static,
    {
        let events: Arc<dyn EventStore> = store.clone();
        let ledger = LoyaltyLedger::new(events.clone(), clock.clone(), metrics.clone());
        let dispatcher = EffectDispatcher::new(
            collaborators.inventory,
            collaborators.notifier,
            ledger.clone(),
            metrics.clone(),
        );
        let relay = OutboxRelay::new(store.clone(), dispatcher, relay_retry, metrics.clone());

        Self {
            orders: OrderCommandHandler::new(events),
            ledger,
            invoices: store,
            relay,
            clock,
            metrics,
        }
    }

    pub fn relay(&self) -> &OutboxRelay {
        &self.relay
    }

    pub fn loyalty(&self) -> &LoyaltyLedger {
        &self.ledger
    }

    // ========================================================================
    // Orders
    // ========================================================================

    /// Price, validate and commit a new order in `Received`
    pub async fn place_order(
        &self,
        requester: Requester,
        request: PlaceOrderRequest,
    ) -> Result<OrderAggregate, FulfillmentError> {
        let result = self.place_order_inner(requester, request).await;
        self.observe("place_order", result)
    }

    async fn place_order_inner(
        &self,
        requester: Requester,
        request: PlaceOrderRequest,
    ) -> Result<OrderAggregate, FulfillmentError> {
        match requester {
            Requester::Admin => {}
            Requester::Customer(id) if id == request.customer_id => {}
            _ => return Err(FulfillmentError::forbidden("place orders for this customer")),
        }

        let totals = self.price(&request)?;
        let order_id = Uuid::new_v4();
        let correlation_id = Uuid::new_v4();
        let points = request.redeem_points;

        if points > 0 {
            self.ledger
                .redeem_points(request.customer_id, points, Some(order_id), correlation_id)
                .await?;
        }

        let placed = self.commit_placement(order_id, &request, totals, correlation_id).await;

        if placed.is_err() && points > 0 {
            match self
                .ledger
                .restore_redeemed_points(request.customer_id, order_id, points, correlation_id)
                .await
            {
                Ok(restored) => tracing::warn!(
                    order_id = %order_id,
                    customer_id = %request.customer_id,
                    points = restored,
                    "Order not placed, redeemed points given back"
                ),
                Err(e) => tracing::error!(
                    order_id = %order_id,
                    customer_id = %request.customer_id,
                    points = points,
                    error = %e,
                    "Order not placed and redeemed points could not be given back"
                ),
            }
        }

        placed
    }

    fn price(&self, request: &PlaceOrderRequest) -> Result<OrderTotals, FulfillmentError> {
        if let Some(line) = request.cart.iter().find(|line| line.title.trim().is_empty()) {
            return Err(FulfillmentError::validation(
                "INVALID_CART_LINE",
                format!("Cart line {} has no title", line.product_id),
            ));
        }
        if request.redeem_points < 0 {
            return Err(LoyaltyError::InvalidPoints(request.redeem_points).into());
        }

        let loyalty_discount = self.ledger.config().discount_for(request.redeem_points);
        let totals = OrderTotals::compute(
            &request.cart,
            request.shipping_cost,
            request.discount,
            request.redeem_points,
            loyalty_discount,
        );
        OrderAggregate::validate_cart(&request.cart, &totals)?;

        Ok(totals)
    }

    async fn commit_placement(
        &self,
        order_id: Uuid,
        request: &PlaceOrderRequest,
        totals: OrderTotals,
        correlation_id: Uuid,
    ) -> Result<OrderAggregate, FulfillmentError> {
        let invoice = self.invoices.next_invoice().await?;
        let command = OrderCommand::PlaceOrder {
            invoice,
            customer_id: request.customer_id,
            cart: request.cart.clone(),
            totals,
            verification_code: VerificationCode::generate(),
            at: self.clock.now(),
        };

        self.commit(order_id, &command, correlation_id, None).await
    }

    /// Move an order along its lifecycle
    pub async fn update_status(
        &self,
        requester: Requester,
        order_id: Uuid,
        change: StatusChange,
    ) -> Result<OrderAggregate, FulfillmentError> {
        let result = self.update_status_inner(requester, order_id, change).await;
        self.observe("update_status", result)
    }

    async fn update_status_inner(
        &self,
        requester: Requester,
        order_id: Uuid,
        change: StatusChange,
    ) -> Result<OrderAggregate, FulfillmentError> {
        let order = self.require_order(order_id).await?;
        authorize_change(requester, &order, &change)?;

        let at = self.clock.now();
        let command = match change {
            StatusChange::Pending => OrderCommand::MarkPending { at },
            StatusChange::Processing { driver_id } => OrderCommand::StartProcessing { driver_id, at },
            StatusChange::OutForDelivery { notes } => OrderCommand::DispatchForDelivery { notes, at },
            StatusChange::Delivered { verification_code } => OrderCommand::ConfirmDelivery {
                code: verification_code,
                at,
            },
            StatusChange::Cancel { reason } => OrderCommand::Cancel {
                reason,
                cancelled_by: match requester {
                    Requester::Customer(_) => CancelledBy::Customer,
                    _ => CancelledBy::Admin,
                },
                at,
            },
        };

        self.commit(order_id, &command, Uuid::new_v4(), Some(order.status)).await
    }

    pub async fn confirm_delivery(
        &self,
        requester: Requester,
        order_id: Uuid,
        verification_code: &str,
    ) -> Result<OrderAggregate, FulfillmentError> {
        self.update_status(
            requester,
            order_id,
            StatusChange::Delivered {
                verification_code: verification_code.to_string(),
            },
        )
        .await
    }

    pub async fn cancel(
        &self,
        requester: Requester,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<OrderAggregate, FulfillmentError> {
        self.update_status(requester, order_id, StatusChange::Cancel { reason }).await
    }

    /// Tick or untick one checklist entry while the order is being collected
    pub async fn set_item_collected(
        &self,
        requester: Requester,
        order_id: Uuid,
        product_id: Uuid,
        collected: bool,
        notes: Option<String>,
    ) -> Result<OrderAggregate, FulfillmentError> {
        let result: Result<OrderAggregate, FulfillmentError> = async {
            let order = self.require_order(order_id).await?;
            let collected_by = match requester {
                Requester::Admin => None,
                Requester::Driver(id) if order.is_assigned_to(id) => Some(id),
                _ => return Err(FulfillmentError::forbidden("update this checklist")),
            };

            let command = OrderCommand::UpdateCollection {
                product_id,
                collected,
                collected_by,
                notes,
                at: self.clock.now(),
            };
            self.commit(order_id, &command, Uuid::new_v4(), Some(order.status)).await
        }
        .await;

        self.observe("set_item_collected", result)
    }

    pub async fn get_order(&self, requester: Requester, order_id: Uuid) -> Result<OrderAggregate, FulfillmentError> {
        let result: Result<OrderAggregate, FulfillmentError> = async {
            let order = self.require_order(order_id).await?;
            if can_read(requester, &order) {
                Ok(order)
            } else {
                Err(FulfillmentError::forbidden("view this order"))
            }
        }
        .await;

        self.observe("get_order", result)
    }

    /// Orders visible to the requester, oldest first
    pub async fn list_orders(&self, requester: Requester) -> Result<Vec<OrderAggregate>, FulfillmentError> {
        let mut orders = Vec::new();
        for order_id in self.orders.list().await? {
            if let Some(order) = self.orders.load(order_id).await? {
                if can_read(requester, &order) {
                    orders.push(order);
                }
            }
        }
        orders.sort_by_key(|order| order.invoice);
        Ok(orders)
    }

    async fn require_order(&self, order_id: Uuid) -> Result<OrderAggregate, FulfillmentError> {
        self.orders
            .load(order_id)
            .await?
            .ok_or_else(|| FulfillmentError::order_not_found(order_id))
    }

    async fn commit(
        &self,
        order_id: Uuid,
        command: &OrderCommand,
        correlation_id: Uuid,
        before: Option<OrderStatus>,
    ) -> Result<OrderAggregate, FulfillmentError> {
        let outcome = self
            .orders
            .handle(order_id, command, correlation_id, plan_order_effects)
            .await?;

        let from = before.map(|s| s.label()).unwrap_or("none");
        for to in outcome.events.iter().filter_map(|e| e.resulting_status()) {
            self.metrics.record_transition(from, to.label());
        }

        if !outcome.outbox.is_empty() {
            if let Err(e) = self.relay.dispatch_entries(&outcome.outbox).await {
                tracing::error!(
                    order_id = %order_id,
                    error = %e,
                    "Inline side-effect dispatch failed, relay will pick the entries up"
                );
            }
        }

        Ok(outcome.aggregate)
    }

    // ========================================================================
    // Loyalty
    // ========================================================================

    pub async fn loyalty_balance(
        &self,
        requester: Requester,
        customer_id: Uuid,
    ) -> Result<LoyaltyBalance, FulfillmentError> {
        let result = match authorize_customer(requester, customer_id) {
            Ok(()) => self.ledger.balance(customer_id).await,
            Err(e) => Err(e),
        };
        self.observe("loyalty_balance", result)
    }

    pub async fn loyalty_history(
        &self,
        requester: Requester,
        customer_id: Uuid,
    ) -> Result<Vec<LoyaltyTransaction>, FulfillmentError> {
        let result = match authorize_customer(requester, customer_id) {
            Ok(()) => self.ledger.history(customer_id).await,
            Err(e) => Err(e),
        };
        self.observe("loyalty_history", result)
    }

    pub async fn dead_letters(&self, requester: Requester, limit: usize) -> Result<Vec<DeadLetter>, FulfillmentError> {
        if requester != Requester::Admin {
            return self.observe("dead_letters", Err(FulfillmentError::forbidden("inspect dead letters")));
        }
        Ok(self.relay.dead_letters(limit).await?)
    }

    fn observe<T>(&self, operation: &'static str, result: Result<T, FulfillmentError>) -> Result<T, FulfillmentError> {
        if let Err(err) = &result {
            self.metrics.record_rejection(err.code());
            match err {
                FulfillmentError::Internal(source) => {
                    tracing::error!(operation, error = %format!("{:#}", source), "Request failed")
                }
                _ => tracing::warn!(operation, code = err.code(), error = %err, "Request rejected"),
            }
        }
        result
    }
}

// ============================================================================
// Authorization
// ============================================================================

fn authorize_change(requester: Requester, order: &OrderAggregate, change: &StatusChange) -> Result<(), FulfillmentError> {
    let allowed = match (requester, change) {
        (Requester::Admin, _) => true,
        (Requester::Customer(id), StatusChange::Cancel { .. }) => id == order.customer_id,
        (Requester::Driver(id), StatusChange::OutForDelivery { .. } | StatusChange::Delivered { .. }) => {
            order.is_assigned_to(id)
        }
        _ => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(FulfillmentError::forbidden(change.action()))
    }
}

fn can_read(requester: Requester, order: &OrderAggregate) -> bool {
    match requester {
        Requester::Admin => true,
        Requester::Customer(id) => id == order.customer_id,
        Requester::Driver(id) => order.is_assigned_to(id),
    }
}

fn authorize_customer(requester: Requester, customer_id: Uuid) -> Result<(), FulfillmentError> {
    match requester {
        Requester::Admin => Ok(()),
        Requester::Customer(id) if id == customer_id => Ok(()),
        _ => Err(FulfillmentError::forbidden("view this loyalty account")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::collaborators::{InMemoryInventory, RecordingNotifier};
    use crate::event_sourcing::InMemoryStore;
    use chrono::Utc;

    fn service() -> (FulfillmentService, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::new());
        let service = FulfillmentService::new(
            Arc::new(InMemoryStore::new()),
            Collaborators {
                inventory: Arc::new(InMemoryInventory::new()),
                notifier: notifier.clone(),
            },
            Arc::new(FixedClock::new(Utc::now())),
            Arc::new(Metrics::new().unwrap()),
            RetryConfig::default(),
        );
        (service, notifier)
    }

    fn request(customer_id: Uuid) -> PlaceOrderRequest {
        PlaceOrderRequest {
            customer_id,
            cart: vec![CartLine::new(Uuid::new_v4(), "Chickpeas", 4, Decimal::new(250, 2))],
            shipping_cost: Decimal::new(500, 2),
            discount: Decimal::ZERO,
            redeem_points: 0,
        }
    }

    #[tokio::test]
    async fn test_placement_notifies_with_code_and_assigns_invoices() {
        let (service, notifier) = service();
        let customer = Uuid::new_v4();

        let first = service.place_order(Requester::Customer(customer), request(customer)).await.unwrap();
        let second = service.place_order(Requester::Admin, request(customer)).await.unwrap();

        assert_eq!(first.status, OrderStatus::Received);
        assert_eq!(first.totals.total, Decimal::new(1500, 2));
        assert!(second.invoice > first.invoice);

        let sent = notifier.sent_for(first.id).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].verification_code.as_ref(), Some(&first.verification_code));
    }

    #[tokio::test]
    async fn test_customer_cannot_order_for_someone_else() {
        let (service, _) = service();
        let err = service
            .place_order(Requester::Customer(Uuid::new_v4()), request(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_boundary_validation() {
        let (service, _) = service();
        let customer = Uuid::new_v4();

        let mut untitled = request(customer);
        untitled.cart[0].title = "  ".to_string();
        assert_eq!(service.place_order(Requester::Admin, untitled).await.unwrap_err().code(), "INVALID_CART_LINE");

        let mut empty = request(customer);
        empty.cart.clear();
        assert_eq!(service.place_order(Requester::Admin, empty).await.unwrap_err().code(), "EMPTY_CART");

        let mut negative = request(customer);
        negative.redeem_points = -10;
        assert_eq!(service.place_order(Requester::Admin, negative).await.unwrap_err().code(), "INVALID_POINTS");

        assert!(service.list_orders(Requester::Admin).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_order_is_not_found() {
        let (service, _) = service();
        let err = service.get_order(Requester::Admin, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.code(), "ORDER_NOT_FOUND");
    }

    #[test]
    fn test_only_admin_assigns_drivers() {
        let order = crate::fulfillment::test_support::order_in(OrderStatus::Pending, 0);
        let change = StatusChange::Processing { driver_id: Uuid::new_v4() };

        assert!(authorize_change(Requester::Admin, &order, &change).is_ok());
        assert!(authorize_change(Requester::Driver(Uuid::new_v4()), &order, &change).is_err());
        assert!(authorize_change(Requester::Customer(order.customer_id), &order, &change).is_err());
    }
}
