use uuid::Uuid;

use super::event::{DomainEvent, EventEnvelope};
use crate::event_sourcing::store::StoreError;

// ============================================================================
// Aggregate Root Pattern - Event Sourcing Core
// ============================================================================
//
// Key Principles:
// 1. State is derived from events (not stored directly)
// 2. Commands are validated before emitting events
// 3. Events represent facts that have already happened
// 4. Aggregates enforce business invariants
//
// `handle_command` must be pure: the repository may call it again after a
// version conflict, against freshly reloaded state.
//
// ============================================================================

/// Generic Aggregate trait - all event-sourced aggregates implement this
pub trait Aggregate: Sized + Send + Sync {
    type Event: DomainEvent;
    type Command: Send + Sync;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Name stored with every event, e.g. "Order"
    const AGGREGATE_TYPE: &'static str;

    /// Create new aggregate from first event
    fn apply_first_event(aggregate_id: Uuid, event: &Self::Event) -> Result<Self, Self::Error>;

    /// Apply subsequent events to update state
    fn apply_event(&mut self, event: &Self::Event) -> Result<(), Self::Error>;

    /// Handle command against existing state and emit events (business logic)
    fn handle_command(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    /// Handle command against a stream with no history yet
    fn handle_new(aggregate_id: Uuid, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    fn aggregate_id(&self) -> Uuid;

    /// Sequence number of the last applied event
    fn version(&self) -> i64;

    fn set_version(&mut self, version: i64);

    /// Reconstruct from event history
    fn load_from_events(events: Vec<EventEnvelope<Self::Event>>) -> Result<Self, StoreError> {
        let mut iter = events.into_iter();
        let first = iter
            .next()
            .ok_or_else(|| StoreError::Corrupted("no events to load".to_string()))?;

        let mut aggregate = Self::apply_first_event(first.aggregate_id, &first.event_data)
            .map_err(|e| StoreError::Corrupted(format!("failed to apply first event: {}", e)))?;
        aggregate.set_version(first.sequence_number);

        for envelope in iter {
            aggregate
                .apply_event(&envelope.event_data)
                .map_err(|e| StoreError::Corrupted(format!("failed to apply event: {}", e)))?;
            aggregate.set_version(envelope.sequence_number);
        }

        Ok(aggregate)
    }
}
