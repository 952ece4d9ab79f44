use kameo::Actor;
use kameo::actor::ActorRef;
use kameo::error::{Infallible, SendError};
use kameo::message::{Context, Message};
use std::time::Duration;

use crate::event_sourcing::StoreError;
use crate::fulfillment::{OutboxRelay, RelayReport};

// ============================================================================
// Outbox Relay Actor - Background Redelivery
// ============================================================================
//
// Commands dispatch their own side effects inline once; whatever is still
// pending afterwards (collaborator down, process crashed between commit and
// dispatch) is picked up here on every tick.
//
// Ticks are sent with `ask` so a failed drain is reported back to the ticker
// and logged instead of stopping the actor.
//
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct DrainOutbox;

pub struct OutboxRelayActor {
    relay: OutboxRelay,
    poll_interval: Duration,
    total: RelayReport,
}

impl OutboxRelayActor {
    pub fn new(relay: OutboxRelay, poll_interval: Duration) -> Self {
        Self {
            relay,
            poll_interval,
            total: RelayReport::default(),
        }
    }
}

impl Actor for OutboxRelayActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(state: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::info!(
            poll_interval_ms = state.poll_interval.as_millis() as u64,
            "📤 OutboxRelayActor started"
        );

        let poll_interval = state.poll_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;

                match actor_ref.ask(DrainOutbox).await {
                    Ok(_) => {}
                    Err(SendError::HandlerError(e)) => {
                        tracing::warn!(error = %e, "Outbox drain failed, retrying next tick");
                    }
                    Err(_) => {
                        tracing::debug!("OutboxRelayActor gone, stopping ticker");
                        break;
                    }
                }
            }
        });

        Ok(state)
    }
}

impl Message<DrainOutbox> for OutboxRelayActor {
    type Reply = Result<RelayReport, StoreError>;

    async fn handle(&mut self, _msg: DrainOutbox, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let report = self.relay.drain().await?;

        self.total.dispatched += report.dispatched;
        self.total.released += report.released;
        self.total.dead_lettered += report.dead_lettered;
        self.total.skipped += report.skipped;

        if report.dispatched + report.dead_lettered > 0 {
            tracing::debug!(
                dispatched = report.dispatched,
                released = report.released,
                dead_lettered = report.dead_lettered,
                total_dispatched = self.total.dispatched,
                "Outbox drained"
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::collaborators::{InMemoryInventory, RecordingNotifier};
    use crate::event_sourcing::{EventStore, InMemoryStore, OutboxEntry, OutboxStatus, OutboxStore, StoredEvent};
    use crate::fulfillment::{EffectDispatcher, LoyaltyLedger, SideEffect};
    use crate::metrics::Metrics;
    use crate::utils::RetryConfig;
    use chrono::Utc;
    use std::sync::Arc;
    use uuid::Uuid;

    fn relay(store: Arc<InMemoryStore>, notifier: Arc<RecordingNotifier>) -> OutboxRelay {
        let metrics = Arc::new(Metrics::new().unwrap());
        let ledger = LoyaltyLedger::new(store.clone(), Arc::new(SystemClock), metrics.clone());
        let dispatcher = EffectDispatcher::new(Arc::new(InMemoryInventory::new()), notifier, ledger, metrics.clone());
        OutboxRelay::new(store, dispatcher, RetryConfig::aggressive().with_max_attempts(3), metrics)
    }

    #[tokio::test]
    async fn test_drain_message_dispatches_pending_purge() {
        let store = Arc::new(InMemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());

        let order_id = Uuid::new_v4();
        let draft = SideEffect::PurgeVerificationNotification { order_id }.to_draft().unwrap();
        let entry = OutboxEntry {
            id: Uuid::now_v7(),
            aggregate_id: order_id,
            sequence_number: 1,
            ordinal: 0,
            effect_type: draft.effect_type,
            payload: draft.payload,
            correlation_id: Uuid::new_v4(),
            created_at: Utc::now(),
            attempts: 0,
            status: OutboxStatus::Pending,
            claimed_at: None,
        };
        let event = StoredEvent {
            aggregate_id: order_id,
            aggregate_type: "Order".to_string(),
            sequence_number: 1,
            event_id: Uuid::new_v4(),
            event_type: "OrderDelivered".to_string(),
            event_version: 1,
            payload: "{}".to_string(),
            correlation_id: entry.correlation_id,
            timestamp: Utc::now(),
        };
        store.append(order_id, "Order", 0, vec![event], vec![entry]).await.unwrap();

        let actor = OutboxRelayActor::spawn(OutboxRelayActor::new(
            relay(store.clone(), notifier.clone()),
            Duration::from_secs(3600),
        ));
        // The first tick fires immediately; either it or this ask does the work
        let _ = actor.ask(DrainOutbox).await.unwrap();

        assert_eq!(notifier.purged().await, vec![order_id]);
        assert!(store.pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_outbox_reports_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let actor = OutboxRelayActor::spawn(OutboxRelayActor::new(
            relay(store, Arc::new(RecordingNotifier::new())),
            Duration::from_secs(3600),
        ));

        assert_eq!(actor.ask(DrainOutbox).await.unwrap(), RelayReport::default());
    }
}
