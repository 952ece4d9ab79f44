use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    DeadLetter, EventStore, InvoiceSequence, OutboxEntry, OutboxStatus, OutboxStore, StoreError,
    StoredEvent, DEFAULT_CLAIM_LEASE_SECS,
};

// ============================================================================
// In-Memory Store
// ============================================================================
//
// Single-process backend. One lock guards streams, outbox and sequences so
// the version check and the write happen atomically, the same guarantee the
// ScyllaDB backend gets from its lightweight transaction.
//
// The outbox only holds live entries: completed and dead-lettered ones are
// removed, so its size tracks the dispatch backlog.
//
// ============================================================================

#[derive(Default)]
struct Inner {
    streams: HashMap<Uuid, Stream>,
    outbox: HashMap<Uuid, OutboxEntry>,
    dead_letters: Vec<DeadLetter>,
    last_invoice: u64,
}

struct Stream {
    aggregate_type: String,
    events: Vec<StoredEvent>,
}

pub struct InMemoryStore {
    inner: Mutex<Inner>,
    claim_lease: Duration,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            claim_lease: Duration::seconds(DEFAULT_CLAIM_LEASE_SECS),
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start invoice numbering after `last_invoice`
    pub fn with_invoice_floor(last_invoice: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                last_invoice,
                ..Inner::default()
            }),
            ..Self::default()
        }
    }

    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    /// Live outbox entries in dispatch order
    pub async fn outbox_snapshot(&self) -> Vec<OutboxEntry> {
        let mut entries: Vec<OutboxEntry> = self.inner.lock().await.outbox.values().cloned().collect();
        entries.sort_by_key(|e| e.dispatch_key());
        entries
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn append(
        &self,
        aggregate_id: Uuid,
        aggregate_type: &str,
        expected_version: i64,
        events: Vec<StoredEvent>,
        outbox: Vec<OutboxEntry>,
    ) -> Result<i64, StoreError> {
        if events.is_empty() {
            return Err(StoreError::Backend("cannot append empty event list".to_string()));
        }

        let mut inner = self.inner.lock().await;

        let current = inner
            .streams
            .get(&aggregate_id)
            .map(|s| s.events.len() as i64)
            .unwrap_or(0);

        if current != expected_version {
            return Err(StoreError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual: current,
            });
        }

        let stream = inner.streams.entry(aggregate_id).or_insert_with(|| Stream {
            aggregate_type: aggregate_type.to_string(),
            events: Vec::new(),
        });

        let mut new_version = expected_version;
        for mut event in events {
            new_version += 1;
            event.sequence_number = new_version;
            stream.events.push(event);
        }

        inner.outbox.extend(outbox.into_iter().map(|entry| (entry.id, entry)));

        tracing::debug!(
            aggregate_id = %aggregate_id,
            aggregate_type = %aggregate_type,
            new_version = new_version,
            "Appended events to in-memory store"
        );

        Ok(new_version)
    }

    async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .streams
            .get(&aggregate_id)
            .map(|s| s.events.clone())
            .unwrap_or_default())
    }

    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .streams
            .get(&aggregate_id)
            .map(|s| s.events.len() as i64)
            .unwrap_or(0))
    }

    async fn list_aggregates(&self, aggregate_type: &str) -> Result<Vec<Uuid>, StoreError> {
        let inner = self.inner.lock().await;
        let mut ids: Vec<Uuid> = inner
            .streams
            .iter()
            .filter(|(_, s)| s.aggregate_type == aggregate_type)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn pending(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        let now = Utc::now();
        let inner = self.inner.lock().await;
        let mut pending: Vec<OutboxEntry> = inner
            .outbox
            .values()
            .filter(|e| e.is_claimable(now, self.claim_lease))
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.dispatch_key());
        pending.truncate(limit);
        Ok(pending)
    }

    async fn claim(&self, id: Uuid) -> Result<bool, StoreError> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        match inner.outbox.get_mut(&id) {
            Some(entry) if entry.is_claimable(now, self.claim_lease) => {
                if entry.status == OutboxStatus::InFlight {
                    tracing::warn!(entry_id = %id, "Retaking outbox entry with expired claim");
                }
                entry.status = OutboxStatus::InFlight;
                entry.claimed_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.outbox.get(&id).is_some_and(|e| e.status == OutboxStatus::InFlight) {
            inner.outbox.remove(&id);
        }
        Ok(())
    }

    async fn release(&self, id: Uuid, attempts: i32, _error: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.outbox.get_mut(&id) {
            if entry.status == OutboxStatus::InFlight {
                entry.status = OutboxStatus::Pending;
                entry.attempts = attempts;
                entry.claimed_at = None;
            }
        }
        Ok(())
    }

    async fn dead_letter(&self, entry: &OutboxEntry, error: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.outbox.remove(&entry.id);

        let mut dead = entry.clone();
        dead.status = OutboxStatus::Dead;
        dead.claimed_at = None;
        inner.dead_letters.push(DeadLetter {
            entry: dead,
            error_message: error.to_string(),
            dead_lettered_at: Utc::now(),
        });
        Ok(())
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.dead_letters.iter().take(limit).cloned().collect())
    }
}

#[async_trait]
impl InvoiceSequence for InMemoryStore {
    async fn next_invoice(&self) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.last_invoice += 1;
        Ok(inner.last_invoice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(aggregate_id: Uuid, event_type: &str) -> StoredEvent {
        StoredEvent {
            aggregate_id,
            aggregate_type: "Order".to_string(),
            sequence_number: 0,
            event_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            event_version: 1,
            payload: "{}".to_string(),
            correlation_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        }
    }

    fn outbox_entry(aggregate_id: Uuid, sequence_number: i64, ordinal: i32) -> OutboxEntry {
        OutboxEntry {
            id: Uuid::now_v7(),
            aggregate_id,
            sequence_number,
            ordinal,
            effect_type: "NotifyCustomer".to_string(),
            payload: "{}".to_string(),
            correlation_id: Uuid::new_v4(),
            created_at: Utc::now(),
            attempts: 0,
            status: OutboxStatus::Pending,
            claimed_at: None,
        }
    }

    #[tokio::test]
    async fn test_append_assigns_sequence_numbers() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();

        let version = store
            .append(id, "Order", 0, vec![stored(id, "OrderPlaced"), stored(id, "OrderMarkedPending")], vec![])
            .await
            .unwrap();

        assert_eq!(version, 2);
        let events = store.load_events(id).await.unwrap();
        assert_eq!(events[0].sequence_number, 1);
        assert_eq!(events[1].sequence_number, 2);
        assert_eq!(store.current_version(id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected_without_writing() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();

        store.append(id, "Order", 0, vec![stored(id, "OrderPlaced")], vec![]).await.unwrap();

        let result = store
            .append(id, "Order", 0, vec![stored(id, "OrderPlaced")], vec![outbox_entry(id, 1, 0)])
            .await;

        assert!(matches!(
            result,
            Err(StoreError::ConcurrencyConflict { expected: 0, actual: 1, .. })
        ));
        assert_eq!(store.current_version(id).await.unwrap(), 1);
        assert!(store.outbox_snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        let entry = outbox_entry(id, 1, 0);
        let entry_id = entry.id;

        store.append(id, "Order", 0, vec![stored(id, "OrderPlaced")], vec![entry]).await.unwrap();

        assert!(store.claim(entry_id).await.unwrap());
        assert!(!store.claim(entry_id).await.unwrap());
        assert!(store.pending(10).await.unwrap().is_empty());

        store.release(entry_id, 1, "notifier down").await.unwrap();
        let pending = store.pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_pending_follows_dispatch_order() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        let mut second = outbox_entry(id, 1, 1);
        let mut first = outbox_entry(id, 1, 0);
        let now = Utc::now();
        second.created_at = now;
        first.created_at = now;

        store
            .append(id, "Order", 0, vec![stored(id, "OrderDelivered")], vec![second, first])
            .await
            .unwrap();

        let pending = store.pending(10).await.unwrap();
        assert_eq!(pending[0].ordinal, 0);
        assert_eq!(pending[1].ordinal, 1);
    }

    #[tokio::test]
    async fn test_dead_letter_removes_from_pending() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        let entry = outbox_entry(id, 1, 0);

        store.append(id, "Order", 0, vec![stored(id, "OrderPlaced")], vec![entry.clone()]).await.unwrap();
        store.dead_letter(&entry, "permanent").await.unwrap();

        assert!(store.pending(10).await.unwrap().is_empty());
        assert!(store.outbox_snapshot().await.is_empty());
        let dead = store.dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].error_message, "permanent");
    }

    #[tokio::test]
    async fn test_completed_entries_are_pruned() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        let done = outbox_entry(id, 1, 0);
        let waiting = outbox_entry(id, 1, 1);
        let done_id = done.id;

        store.append(id, "Order", 0, vec![stored(id, "OrderPlaced")], vec![done, waiting.clone()]).await.unwrap();
        assert!(store.claim(done_id).await.unwrap());
        store.complete(done_id).await.unwrap();

        let live = store.outbox_snapshot().await;
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, waiting.id);
        assert!(!store.claim(done_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_abandoned_claim_is_retaken_after_lease() {
        let store = InMemoryStore::new().with_claim_lease(Duration::zero());
        let id = Uuid::new_v4();
        let entry = outbox_entry(id, 1, 0);
        let entry_id = entry.id;

        store.append(id, "Order", 0, vec![stored(id, "OrderPlaced")], vec![entry]).await.unwrap();
        assert!(store.claim(entry_id).await.unwrap());

        let pending = store.pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, OutboxStatus::InFlight);
        assert!(store.claim(entry_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_live_claim_is_honoured() {
        let store = InMemoryStore::new().with_claim_lease(Duration::minutes(5));
        let id = Uuid::new_v4();
        let entry = outbox_entry(id, 1, 0);
        let entry_id = entry.id;

        store.append(id, "Order", 0, vec![stored(id, "OrderPlaced")], vec![entry]).await.unwrap();
        assert!(store.claim(entry_id).await.unwrap());

        assert!(store.pending(10).await.unwrap().is_empty());
        assert!(!store.claim(entry_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_invoice_numbers_increase() {
        let store = InMemoryStore::with_invoice_floor(10_000);
        assert_eq!(store.next_invoice().await.unwrap(), 10_001);
        assert_eq!(store.next_invoice().await.unwrap(), 10_002);
    }

    #[tokio::test]
    async fn test_list_aggregates_by_type() {
        let store = InMemoryStore::new();
        let order = Uuid::new_v4();
        let customer = Uuid::new_v4();

        store.append(order, "Order", 0, vec![stored(order, "OrderPlaced")], vec![]).await.unwrap();
        let mut opened = stored(customer, "LoyaltyAccountOpened");
        opened.aggregate_type = "Customer".to_string();
        store.append(customer, "Customer", 0, vec![opened], vec![]).await.unwrap();

        assert_eq!(store.list_aggregates("Customer").await.unwrap(), vec![customer]);
        assert_eq!(store.list_aggregates("Order").await.unwrap(), vec![order]);
    }
}
