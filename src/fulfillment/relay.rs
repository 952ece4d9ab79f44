use std::sync::Arc;

use super::dispatcher::{DispatchError, EffectDispatcher};
use crate::event_sourcing::{DeadLetter, OutboxEntry, OutboxStore, StoreError};
use crate::metrics::Metrics;
use crate::utils::{retry_on_transient, RetryConfig, RetryResult};

// ============================================================================
// Outbox Relay
// ============================================================================
//
// Claim → Dispatch → Complete
//
// The claim is a conditional pending → in-flight update, so two relays (or
// the inline pass and the background pass) never run the same entry at the
// same time. Failed entries go back to pending with their attempt count;
// entries that fail permanently or run out of attempts are dead-lettered.
// A claim left behind by a crashed worker, or by a failed `complete`, expires
// after the store's lease and the entry is drained again.
//
// ============================================================================

const DRAIN_BATCH: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub dispatched: usize,
    pub released: usize,
    pub dead_lettered: usize,
    /// Claimed by someone else first
    pub skipped: usize,
}

#[derive(Clone)]
pub struct OutboxRelay {
    outbox: Arc<dyn OutboxStore>,
    dispatcher: EffectDispatcher,
    retry: RetryConfig,
    metrics: Arc<Metrics>,
}

impl OutboxRelay {
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        dispatcher: EffectDispatcher,
        retry: RetryConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            outbox,
            dispatcher,
            retry,
            metrics,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn max_attempts(&self) -> i32 {
        self.retry.max_attempts.max(1) as i32
    }

    /// One attempt per entry, straight after the transition committed.
    /// Transient failures are left for the background drain.
    pub async fn dispatch_entries(&self, entries: &[OutboxEntry]) -> Result<RelayReport, StoreError> {
        let mut report = RelayReport::default();

        for entry in entries {
            if !self.outbox.claim(entry.id).await? {
                report.skipped += 1;
                continue;
            }

            match self.dispatcher.dispatch(entry).await {
                Ok(()) => {
                    self.outbox.complete(entry.id).await?;
                    report.dispatched += 1;
                }
                Err(error) => {
                    let attempts = entry.attempts + 1;
                    self.settle_failure(entry, attempts, &error, &mut report).await?;
                }
            }
        }

        Ok(report)
    }

    /// Retry every pending entry with backoff, within its remaining attempts
    pub async fn drain(&self) -> Result<RelayReport, StoreError> {
        let pending = self.outbox.pending(DRAIN_BATCH).await?;
        let mut report = RelayReport::default();

        for entry in pending {
            if !self.outbox.claim(entry.id).await? {
                report.skipped += 1;
                continue;
            }

            let remaining = (self.max_attempts() - entry.attempts).max(1) as u32;
            let budget = self.retry.clone().with_max_attempts(remaining);

            let result = retry_on_transient(&entry.effect_type, &budget, |_| self.dispatcher.dispatch(&entry)).await;
            let tries = result.attempts();
            if entry.attempts > 0 || tries > 1 {
                self.metrics.record_retry(&entry.effect_type, tries);
            }

            match result {
                RetryResult::Success { .. } => {
                    self.outbox.complete(entry.id).await?;
                    report.dispatched += 1;
                }
                RetryResult::Exhausted { error, .. } | RetryResult::Permanent { error, .. } => {
                    let attempts = entry.attempts + tries as i32;
                    self.settle_failure(&entry, attempts, &error, &mut report).await?;
                }
            }
        }

        if report != RelayReport::default() {
            tracing::info!(
                dispatched = report.dispatched,
                released = report.released,
                dead_lettered = report.dead_lettered,
                skipped = report.skipped,
                "🔄 Outbox drained"
            );
        }

        Ok(report)
    }

    async fn settle_failure(
        &self,
        entry: &OutboxEntry,
        attempts: i32,
        error: &DispatchError,
        report: &mut RelayReport,
    ) -> Result<(), StoreError> {
        let message = error.to_string();

        if matches!(error, DispatchError::Permanent(_)) || attempts >= self.max_attempts() {
            let dead = OutboxEntry {
                attempts,
                ..entry.clone()
            };
            self.outbox.dead_letter(&dead, &message).await?;
            self.metrics.record_dead_letter(&entry.effect_type);
            report.dead_lettered += 1;

            tracing::error!(
                entry_id = %entry.id,
                effect_type = %entry.effect_type,
                aggregate_id = %entry.aggregate_id,
                attempts = attempts,
                error = %message,
                "💀 Side effect moved to dead-letter queue"
            );
        } else {
            self.outbox.release(entry.id, attempts, &message).await?;
            report.released += 1;
        }

        Ok(())
    }

    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, StoreError> {
        self.outbox.dead_letters(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::collaborators::{InMemoryInventory, RecordingNotifier};
    use crate::domain::order::{CartLine, OrderStatus};
    use crate::event_sourcing::{InMemoryStore, OutboxStatus};
    use crate::fulfillment::effects::SideEffect;
    use crate::fulfillment::loyalty::LoyaltyLedger;
    use crate::collaborators::CustomerNotification;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::time::Duration;
    use uuid::Uuid;

    struct Fixture {
        store: Arc<InMemoryStore>,
        inventory: Arc<InMemoryInventory>,
        notifier: Arc<RecordingNotifier>,
        relay: OutboxRelay,
    }

    fn fixture(max_attempts: u32) -> Fixture {
        fixture_on(InMemoryStore::new(), max_attempts)
    }

    fn fixture_on(store: InMemoryStore, max_attempts: u32) -> Fixture {
        let store = Arc::new(store);
        let inventory = Arc::new(InMemoryInventory::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let ledger = LoyaltyLedger::new(store.clone(), Arc::new(SystemClock), metrics.clone());
        let dispatcher = EffectDispatcher::new(inventory.clone(), notifier.clone(), ledger, metrics.clone());
        let retry = RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        };
        let relay = OutboxRelay::new(store.clone(), dispatcher, retry, metrics);
        Fixture { store, inventory, notifier, relay }
    }

    fn entry(effect: SideEffect) -> OutboxEntry {
        let draft = effect.to_draft().unwrap();
        OutboxEntry {
            id: Uuid::now_v7(),
            aggregate_id: Uuid::new_v4(),
            sequence_number: 1,
            ordinal: 0,
            effect_type: draft.effect_type,
            payload: draft.payload,
            correlation_id: Uuid::new_v4(),
            created_at: Utc::now(),
            attempts: 0,
            status: OutboxStatus::Pending,
            claimed_at: None,
        }
    }

    async fn seed(store: &InMemoryStore, entries: Vec<OutboxEntry>) {
        use crate::event_sourcing::{EventStore, StoredEvent};

        let aggregate_id = entries[0].aggregate_id;
        let event = StoredEvent {
            aggregate_id,
            aggregate_type: "Order".to_string(),
            sequence_number: 1,
            event_id: Uuid::new_v4(),
            event_type: "OrderPlaced".to_string(),
            event_version: 1,
            payload: "{}".to_string(),
            correlation_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        };
        store.append(aggregate_id, "Order", 0, vec![event], entries).await.unwrap();
    }

    fn notice() -> SideEffect {
        SideEffect::NotifyCustomer(CustomerNotification {
            customer_id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            status: OrderStatus::Pending,
            invoice: 7,
            verification_code: None,
        })
    }

    #[tokio::test]
    async fn test_inline_failure_is_released_for_drain() {
        let f = fixture(5);
        let pending = entry(notice());
        seed(&f.store, vec![pending.clone()]).await;
        f.notifier.fail_next(1).await;

        let inline = f.relay.dispatch_entries(&[pending.clone()]).await.unwrap();
        assert_eq!(inline.released, 1);
        assert!(f.notifier.sent().await.is_empty());

        let drained = f.relay.drain().await.unwrap();
        assert_eq!(drained.dispatched, 1);
        assert_eq!(f.notifier.sent().await.len(), 1);

        assert!(f.store.outbox_snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_entry_is_dead_lettered() {
        let f = fixture(3);
        seed(&f.store, vec![entry(notice())]).await;
        f.notifier.fail_next(10).await;

        let report = f.relay.drain().await.unwrap();
        assert_eq!(report.dead_lettered, 1);

        let dead = f.relay.dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].entry.attempts, 3);
        assert!(f.relay.drain().await.unwrap() == RelayReport::default());
    }

    #[tokio::test]
    async fn test_permanent_failure_skips_retries() {
        let f = fixture(5);
        let lines = vec![CartLine::new(Uuid::new_v4(), "Tea", 1, Decimal::ONE)];
        seed(&f.store, vec![entry(SideEffect::AdjustStock { order_id: Uuid::new_v4(), lines })]).await;
        f.inventory.reject_all(true).await;

        let report = f.relay.drain().await.unwrap();
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(f.relay.dead_letters(10).await.unwrap()[0].entry.attempts, 1);
    }

    #[tokio::test]
    async fn test_claimed_entry_is_not_dispatched_twice() {
        let f = fixture(5);
        let pending = entry(notice());
        seed(&f.store, vec![pending.clone()]).await;

        assert!(f.store.claim(pending.id).await.unwrap());
        let report = f.relay.dispatch_entries(&[pending]).await.unwrap();

        assert_eq!(report.skipped, 1);
        assert!(f.notifier.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_claim_is_drained_after_lease() {
        let f = fixture_on(InMemoryStore::new().with_claim_lease(chrono::Duration::zero()), 5);
        let pending = entry(notice());
        seed(&f.store, vec![pending.clone()]).await;

        // Worker claims and disappears before complete or release
        assert!(f.store.claim(pending.id).await.unwrap());

        let report = f.relay.drain().await.unwrap();
        assert_eq!(report.dispatched, 1);
        assert_eq!(f.notifier.sent().await.len(), 1);
        assert!(f.store.outbox_snapshot().await.is_empty());
    }
}
