use kameo::Actor;
use kameo::actor::ActorRef;
use kameo::error::Infallible;
use kameo::message::{Context, Message};
use kameo::reply::{Reply, ReplyError};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::actors::core::{overall_status, ComponentHealth, HealthStatus};
use crate::fulfillment::OutboxRelay;
use crate::messaging::RedpandaClient;
use crate::metrics::Metrics;
use crate::utils::CircuitState;

// ============================================================================
// Health Monitor Actor - Monitors system health
// ============================================================================
//
// Responsibilities:
// - Track health status of all components
// - Check the notification broker circuit and the dead-letter backlog
// - Export the aggregate status on the health gauge served by /health
//
// ============================================================================

const DEAD_LETTER_CHECK_LIMIT: usize = 1000;

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug)]
pub struct UpdateHealth {
    pub component: String,
    pub status: HealthStatus,
    pub details: Option<String>,
}

#[derive(Debug)]
pub struct GetSystemHealth;

/// Run every check once and record the results
#[derive(Debug)]
pub struct CheckComponents;

#[derive(Debug, Clone)]
pub struct SystemHealth {
    pub overall_status: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub check_time: chrono::DateTime<Utc>,
}

impl Reply for SystemHealth {
    type Ok = Self;
    type Error = Infallible;
    type Value = Self;

    fn to_result(self) -> Result<Self, Infallible> {
        Ok(self)
    }

    fn into_any_err(self) -> Option<Box<dyn ReplyError>> {
        None
    }

    fn into_value(self) -> Self::Value {
        self
    }
}

// ============================================================================
// Health Monitor Actor
// ============================================================================

pub struct HealthMonitorActor {
    components: HashMap<String, ComponentHealth>,
    redpanda: Option<Arc<RedpandaClient>>,
    relay: Option<OutboxRelay>,
    metrics: Arc<Metrics>,
    check_interval: Duration,
}

impl HealthMonitorActor {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            components: HashMap::new(),
            redpanda: None,
            relay: None,
            metrics,
            check_interval: Duration::from_secs(10),
        }
    }

    pub fn with_redpanda(mut self, redpanda: Arc<RedpandaClient>) -> Self {
        self.redpanda = Some(redpanda);
        self
    }

    pub fn with_outbox(mut self, relay: OutboxRelay) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn with_check_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    fn record(&mut self, component: String, status: HealthStatus, details: Option<String>) {
        tracing::debug!(component = %component, status = ?status, "Updated component health");

        let mut health = ComponentHealth::new(component.clone(), status);
        health.details = details;
        self.components.insert(component, health);

        self.metrics
            .update_health_status(overall_status(self.components.values()).as_gauge());
    }

    async fn check_redpanda(&self) -> Option<(HealthStatus, Option<String>)> {
        let redpanda = self.redpanda.as_ref()?;
        let state = redpanda.circuit_state().await;
        self.metrics.update_circuit_breaker_state(state.as_gauge());

        let status = match state {
            CircuitState::Closed => HealthStatus::Healthy,
            CircuitState::HalfOpen => HealthStatus::Degraded("Circuit breaker half-open".to_string()),
            CircuitState::Open => HealthStatus::Unhealthy("Circuit breaker open".to_string()),
        };
        Some((status, None))
    }

    async fn check_outbox(&self) -> Option<(HealthStatus, Option<String>)> {
        let relay = self.relay.as_ref()?;
        let checked = match relay.dead_letters(DEAD_LETTER_CHECK_LIMIT).await {
            Ok(dead) if dead.is_empty() => (HealthStatus::Healthy, None),
            Ok(dead) => (
                HealthStatus::Degraded(format!("{} dead-lettered side effects", dead.len())),
                dead.first().map(|d| format!("oldest: {} ({})", d.entry.effect_type, d.error_message)),
            ),
            Err(e) => (HealthStatus::Unhealthy("Outbox unreadable".to_string()), Some(e.to_string())),
        };
        Some(checked)
    }

    fn snapshot(&self) -> SystemHealth {
        SystemHealth {
            overall_status: overall_status(self.components.values()),
            components: self.components.clone(),
            check_time: Utc::now(),
        }
    }
}

impl Actor for HealthMonitorActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(state: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::info!("HealthMonitorActor started");
        state.metrics.update_health_status(HealthStatus::Healthy.as_gauge());

        let check_interval = state.check_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(check_interval);
            loop {
                interval.tick().await;

                // Fire and forget - use tell
                if actor_ref.tell(CheckComponents).send().await.is_err() {
                    break;
                }
            }
        });

        Ok(state)
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<UpdateHealth> for HealthMonitorActor {
    type Reply = ();

    async fn handle(&mut self, msg: UpdateHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.record(msg.component, msg.status, msg.details);
    }
}

impl Message<CheckComponents> for HealthMonitorActor {
    type Reply = SystemHealth;

    async fn handle(&mut self, _msg: CheckComponents, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        if let Some((status, details)) = self.check_redpanda().await {
            self.record("redpanda".to_string(), status, details);
        }
        if let Some((status, details)) = self.check_outbox().await {
            self.record("outbox".to_string(), status, details);
        }

        let health = self.snapshot();
        if !health.overall_status.is_healthy() {
            tracing::warn!(status = ?health.overall_status, "System health degraded");
        }
        health
    }
}

impl Message<GetSystemHealth> for HealthMonitorActor {
    type Reply = SystemHealth;

    async fn handle(&mut self, _msg: GetSystemHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unhealthy_component_drives_gauge() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let monitor = HealthMonitorActor::spawn(
            HealthMonitorActor::new(metrics.clone()).with_check_interval(Duration::from_secs(3600)),
        );

        monitor
            .ask(UpdateHealth {
                component: "redpanda".to_string(),
                status: HealthStatus::Unhealthy("Circuit breaker open".to_string()),
                details: None,
            })
            .await
            .unwrap();

        let health = monitor.ask(GetSystemHealth).await.unwrap();
        assert_eq!(health.overall_status.as_gauge(), 0);
        assert_eq!(metrics.health_status.get(), 0);

        monitor
            .ask(UpdateHealth {
                component: "redpanda".to_string(),
                status: HealthStatus::Healthy,
                details: None,
            })
            .await
            .unwrap();
        assert_eq!(metrics.health_status.get(), 2);
    }

    #[tokio::test]
    async fn test_check_without_dependencies_is_healthy() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let monitor = HealthMonitorActor::spawn(
            HealthMonitorActor::new(metrics).with_check_interval(Duration::from_secs(3600)),
        );

        let health = monitor.ask(CheckComponents).await.unwrap();
        assert!(health.overall_status.is_healthy());
        assert!(health.components.is_empty());
    }
}
