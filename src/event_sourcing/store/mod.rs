// ============================================================================
// Event Sourcing Store - Persistence Ports
// ============================================================================
//
// Type-erased persistence for event streams and the transactional outbox.
// Events and outbox entries travel as serialized rows so one store instance
// serves every aggregate type.
//
// Backends:
// - memory       - single-process, used by tests and the demo
// - scylla_store - ScyllaDB, lightweight transaction on the stream version
//
// ============================================================================

pub mod memory;
pub mod scylla_store;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use memory::InMemoryStore;
pub use scylla_store::ScyllaStore;

/// Seconds an in-flight claim is honoured before the entry can be retaken
pub const DEFAULT_CLAIM_LEASE_SECS: i64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Concurrency conflict on {aggregate_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        aggregate_id: Uuid,
        expected: i64,
        actual: i64,
    },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Stored data is corrupted: {0}")]
    Corrupted(String),
}

impl StoreError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        StoreError::Backend(err.to_string())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::ConcurrencyConflict { .. })
    }
}

/// One row of an aggregate's event stream
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    pub sequence_number: i64,
    pub event_id: Uuid,
    pub event_type: String,
    pub event_version: i32,
    pub payload: String,
    pub correlation_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxStatus {
    Pending,
    InFlight,
    Dead,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::InFlight => "in_flight",
            OutboxStatus::Dead => "dead",
        }
    }

    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "pending" => Ok(OutboxStatus::Pending),
            "in_flight" => Ok(OutboxStatus::InFlight),
            "dead" => Ok(OutboxStatus::Dead),
            other => Err(StoreError::Corrupted(format!("unknown outbox status '{}'", other))),
        }
    }
}

/// A side effect waiting to be dispatched, written with the events that caused it
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    /// Sequence number of the last event of the transition
    pub sequence_number: i64,
    /// Position within the transition's effect list
    pub ordinal: i32,
    pub effect_type: String,
    pub payload: String,
    pub correlation_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub attempts: i32,
    pub status: OutboxStatus,
    /// When the current in-flight claim was taken
    pub claimed_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    /// Pending, or in flight under a claim older than `lease`. A worker that
    /// died mid-dispatch leaves its claim behind; once the lease runs out the
    /// entry is handed to the next relay.
    pub fn is_claimable(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        match self.status {
            OutboxStatus::Pending => true,
            OutboxStatus::InFlight => self.claimed_at.map_or(true, |at| at + lease <= now),
            OutboxStatus::Dead => false,
        }
    }

    /// Dispatch order: oldest transition first, then declared order
    pub fn dispatch_key(&self) -> (DateTime<Utc>, Uuid, i64, i32) {
        (self.created_at, self.aggregate_id, self.sequence_number, self.ordinal)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub entry: OutboxEntry,
    pub error_message: String,
    pub dead_lettered_at: DateTime<Utc>,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append events and their outbox entries in one write, only if the
    /// stream is still at `expected_version`. Returns the new version.
    async fn append(
        &self,
        aggregate_id: Uuid,
        aggregate_type: &str,
        expected_version: i64,
        events: Vec<StoredEvent>,
        outbox: Vec<OutboxEntry>,
    ) -> Result<i64, StoreError>;

    /// Events in sequence order; empty if the stream does not exist
    async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, StoreError>;

    /// 0 for a stream with no events
    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, StoreError>;

    async fn list_aggregates(&self, aggregate_type: &str) -> Result<Vec<Uuid>, StoreError>;
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Claimable entries in dispatch order: pending ones plus in-flight
    /// ones whose claim lease has expired
    async fn pending(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError>;

    /// Conditional move to in-flight, stamped with the claim time. `false`
    /// if someone else holds a live claim or the entry is gone.
    async fn claim(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Removes the entry; finished effects are not kept
    async fn complete(&self, id: Uuid) -> Result<(), StoreError>;

    /// Back to pending after a failed attempt
    async fn release(&self, id: Uuid, attempts: i32, error: &str) -> Result<(), StoreError>;

    /// Record in the dead-letter queue and drop from the outbox
    async fn dead_letter(&self, entry: &OutboxEntry, error: &str) -> Result<(), StoreError>;

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, StoreError>;
}

/// Customer-facing invoice numbers. Strictly increasing, never reused.
#[async_trait]
pub trait InvoiceSequence: Send + Sync {
    async fn next_invoice(&self) -> Result<u64, StoreError>;
}
