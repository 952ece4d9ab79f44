use kameo::Actor;
use kameo::actor::ActorRef;
use kameo::error::{Infallible, SendError};
use kameo::message::{Context, Message};
use std::time::Duration;

use crate::error::FulfillmentError;
use crate::fulfillment::{ExpirySweep, LoyaltyLedger};

// ============================================================================
// Expiry Sweeper Actor - Periodic Loyalty Points Expiry
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct SweepExpiredPoints;

pub struct ExpirySweeperActor {
    ledger: LoyaltyLedger,
    sweep_interval: Duration,
    sweeps_run: u64,
}

impl ExpirySweeperActor {
    pub fn new(ledger: LoyaltyLedger, sweep_interval: Duration) -> Self {
        Self {
            ledger,
            sweep_interval,
            sweeps_run: 0,
        }
    }
}

impl Actor for ExpirySweeperActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(state: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::info!(
            sweep_interval_secs = state.sweep_interval.as_secs(),
            "⏳ ExpirySweeperActor started"
        );

        let sweep_interval = state.sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick completes immediately; the first sweep waits a full period
            interval.tick().await;
            loop {
                interval.tick().await;

                match actor_ref.ask(SweepExpiredPoints).await {
                    Ok(_) => {}
                    Err(SendError::HandlerError(e)) => {
                        tracing::warn!(error = %e, "Points expiry sweep failed");
                    }
                    Err(_) => break,
                }
            }
        });

        Ok(state)
    }
}

impl Message<SweepExpiredPoints> for ExpirySweeperActor {
    type Reply = Result<ExpirySweep, FulfillmentError>;

    async fn handle(&mut self, _msg: SweepExpiredPoints, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let sweep = self.ledger.expire_all_points().await?;
        self.sweeps_run += 1;

        if sweep.failed > 0 {
            tracing::warn!(
                accounts = sweep.accounts,
                failed = sweep.failed,
                sweeps_run = self.sweeps_run,
                "Points expiry sweep finished with failures"
            );
        }

        Ok(sweep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::event_sourcing::InMemoryStore;
    use crate::metrics::Metrics;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_sweep_expires_lapsed_points() {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let ledger = LoyaltyLedger::new(store, clock.clone(), Arc::new(Metrics::new().unwrap()));

        let customer_id = Uuid::new_v4();
        ledger
            .award_points(customer_id, Uuid::new_v4(), Decimal::from(300), Uuid::new_v4())
            .await
            .unwrap();
        clock.advance(chrono::Duration::days(366));

        let actor = ExpirySweeperActor::spawn(ExpirySweeperActor::new(ledger.clone(), Duration::from_secs(3600)));
        let sweep = actor.ask(SweepExpiredPoints).await.unwrap();

        assert_eq!(sweep.accounts, 1);
        assert_eq!(sweep.points_expired, 300);
        assert_eq!(ledger.balance(customer_id).await.unwrap().points.current, 0);
    }
}
