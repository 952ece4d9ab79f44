use std::sync::Arc;
use uuid::Uuid;

use crate::event_sourcing::{
    Aggregate, CommandOutcome, EventStore, ExecuteError, OutboxDraft, Repository, StoreError,
};

use super::aggregate::OrderAggregate;
use super::commands::OrderCommand;
use super::errors::OrderError;
use super::events::OrderEvent;

// ============================================================================
// Order Command Handler
// ============================================================================
//
// Orchestrates: Command → Aggregate → (Events + Side Effects) → Event Store
//
// The caller supplies the side-effect plan; this handler only knows how the
// order stream is loaded, versioned and logged.
//
// ============================================================================

#[derive(Clone)]
pub struct OrderCommandHandler {
    repository: Repository<OrderAggregate>,
}

impl OrderCommandHandler {
    pub fn new(event_store: Arc<dyn EventStore>) -> Self {
        Self {
            repository: Repository::new(event_store),
        }
    }

    pub async fn load(&self, order_id: Uuid) -> Result<Option<OrderAggregate>, StoreError> {
        self.repository.load(order_id).await
    }

    pub async fn list(&self) -> Result<Vec<Uuid>, StoreError> {
        self.repository.list().await
    }

    /// Handle a command and persist resulting events with their side effects
    pub async fn handle<P>(
        &self,
        order_id: Uuid,
        command: &OrderCommand,
        correlation_id: Uuid,
        plan: P,
    ) -> Result<CommandOutcome<OrderAggregate>, ExecuteError<OrderError>>
    where
        P: Fn(&OrderAggregate, &[OrderEvent]) -> Result<Vec<OutboxDraft>, StoreError>,
    {
        let outcome = self
            .repository
            .execute(order_id, command, correlation_id, plan)
            .await?;

        for status in outcome.events.iter().filter_map(OrderEvent::resulting_status) {
            tracing::info!(
                order_id = %order_id,
                invoice = outcome.aggregate.invoice,
                status = %status,
                version = outcome.aggregate.version(),
                effects = outcome.outbox.len(),
                "📦 Order status changed"
            );
        }

        Ok(outcome)
    }
}
