use std::sync::Arc;
use uuid::Uuid;

use crate::event_sourcing::{CommandOutcome, EventStore, ExecuteError, Repository, StoreError};

use super::aggregate::CustomerAggregate;
use super::commands::CustomerCommand;
use super::errors::LoyaltyError;
use super::events::CustomerEvent;

// ============================================================================
// Customer Command Handler
// ============================================================================
//
// Orchestrates: Command → Aggregate → Events → Event Store
//
// Ledger commands have no side effects of their own, so nothing is written
// to the outbox from here.
//
// ============================================================================

#[derive(Clone)]
pub struct CustomerCommandHandler {
    repository: Repository<CustomerAggregate>,
}

impl CustomerCommandHandler {
    pub fn new(event_store: Arc<dyn EventStore>) -> Self {
        Self {
            repository: Repository::new(event_store),
        }
    }

    pub async fn load(&self, customer_id: Uuid) -> Result<Option<CustomerAggregate>, StoreError> {
        self.repository.load(customer_id).await
    }

    pub async fn list(&self) -> Result<Vec<Uuid>, StoreError> {
        self.repository.list().await
    }

    /// Handle a command and persist resulting events
    pub async fn handle(
        &self,
        customer_id: Uuid,
        command: &CustomerCommand,
        correlation_id: Uuid,
    ) -> Result<CommandOutcome<CustomerAggregate>, ExecuteError<LoyaltyError>> {
        let outcome = self
            .repository
            .execute(customer_id, command, correlation_id, |_, _| Ok(Vec::new()))
            .await?;

        for event in &outcome.events {
            if let CustomerEvent::TransactionPosted(tx) = event {
                tracing::info!(
                    customer_id = %customer_id,
                    kind = tx.kind.as_str(),
                    points = tx.points,
                    balance_after = tx.balance_after,
                    order_id = ?tx.order_id,
                    "🎯 Loyalty transaction posted"
                );
            }
        }

        Ok(outcome)
    }
}
