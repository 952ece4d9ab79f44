use kameo::Actor;
use kameo::actor::ActorRef;
use std::sync::Arc;
use std::time::Duration;

use super::{ExpirySweeperActor, HealthMonitorActor, OutboxRelayActor, UpdateHealth};
use crate::actors::core::HealthStatus;
use crate::fulfillment::FulfillmentService;
use crate::messaging::RedpandaClient;
use crate::metrics::Metrics;

// ============================================================================
// Background Actors - Startup and Shutdown of the Infrastructure Actors
// ============================================================================
//
// Actor Hierarchy:
//   BackgroundActors
//   ├── HealthMonitorActor
//   ├── OutboxRelayActor
//   └── ExpirySweeperActor
//
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub outbox_poll_interval: Duration,
    pub points_expiry_interval: Duration,
}

pub struct BackgroundActors {
    pub health_monitor: ActorRef<HealthMonitorActor>,
    pub outbox_relay: ActorRef<OutboxRelayActor>,
    pub expiry_sweeper: ActorRef<ExpirySweeperActor>,
}

impl BackgroundActors {
    pub async fn start(
        service: &FulfillmentService,
        redpanda: Option<Arc<RedpandaClient>>,
        metrics: Arc<Metrics>,
        schedule: Schedule,
    ) -> Self {
        tracing::info!("Starting background actors");

        let mut monitor = HealthMonitorActor::new(metrics).with_outbox(service.relay().clone());
        if let Some(redpanda) = redpanda {
            monitor = monitor.with_redpanda(redpanda);
        }
        let health_monitor = HealthMonitorActor::spawn(monitor);

        let outbox_relay = OutboxRelayActor::spawn(OutboxRelayActor::new(
            service.relay().clone(),
            schedule.outbox_poll_interval,
        ));
        report_started(&health_monitor, "outbox_relay").await;

        let expiry_sweeper = ExpirySweeperActor::spawn(ExpirySweeperActor::new(
            service.loyalty().clone(),
            schedule.points_expiry_interval,
        ));
        report_started(&health_monitor, "expiry_sweeper").await;

        tracing::info!("✅ All background actors started");

        Self {
            health_monitor,
            outbox_relay,
            expiry_sweeper,
        }
    }

    /// Stop the workers first so the monitor sees them go
    pub async fn shutdown(self) {
        tracing::info!("Stopping background actors");

        if let Err(e) = self.outbox_relay.stop_gracefully().await {
            tracing::warn!(error = ?e, "OutboxRelayActor did not stop cleanly");
        }
        if let Err(e) = self.expiry_sweeper.stop_gracefully().await {
            tracing::warn!(error = ?e, "ExpirySweeperActor did not stop cleanly");
        }
        if let Err(e) = self.health_monitor.stop_gracefully().await {
            tracing::warn!(error = ?e, "HealthMonitorActor did not stop cleanly");
        }
    }
}

async fn report_started(health_monitor: &ActorRef<HealthMonitorActor>, component: &str) {
    let update = UpdateHealth {
        component: component.to_string(),
        status: HealthStatus::Healthy,
        details: Some(format!("{} started", component)),
    };
    if let Err(e) = health_monitor.tell(update).send().await {
        tracing::warn!(component = %component, error = ?e, "Could not report actor health");
    }
}
