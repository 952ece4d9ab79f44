use anyhow::{Context, Result};
use rdkafka::{
    config::ClientConfig,
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
};
use std::time::Duration;

use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka-compatible producer guarded by a circuit breaker
pub struct RedpandaClient {
    producer: FutureProducer,
    circuit_breaker: CircuitBreaker,
}

impl RedpandaClient {
    pub fn new(brokers: &str) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("enable.idempotence", "true")
            .create()
            .with_context(|| format!("creating Redpanda producer for {}", brokers))?;

        Ok(Self {
            producer,
            circuit_breaker: CircuitBreaker::new(
                "redpanda",
                CircuitBreakerConfig {
                    failure_threshold: 5,
                    open_timeout: Duration::from_secs(30),
                    success_threshold: 3,
                },
            ),
        })
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<()> {
        self.send(topic, key, Some(payload)).await
    }

    /// Null-payload record; compaction drops earlier values for `key`
    pub async fn publish_tombstone(&self, topic: &str, key: &str) -> Result<()> {
        self.send(topic, key, None).await
    }

    async fn send(&self, topic: &str, key: &str, payload: Option<&str>) -> Result<()> {
        let result = self
            .circuit_breaker
            .call(async {
                let mut record: FutureRecord<'_, str, str> = FutureRecord::to(topic).key(key);
                if let Some(payload) = payload {
                    record = record.payload(payload);
                }

                self.producer
                    .send(record, Timeout::After(SEND_TIMEOUT))
                    .await
                    .map_err(|(e, _)| anyhow::anyhow!("Kafka send error: {}", e))?;

                Ok::<(), anyhow::Error>(())
            })
            .await;

        match result {
            Ok(()) => {
                tracing::debug!(topic = %topic, key = %key, tombstone = payload.is_none(), "Published to Redpanda");
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen(name)) => {
                tracing::error!(topic = %topic, circuit = name, "Circuit breaker open - Redpanda unavailable");
                Err(anyhow::anyhow!("Circuit breaker open for Redpanda"))
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::error!(error = %e, topic = %topic, "Failed to publish to Redpanda");
                Err(e)
            }
        }
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state().await
    }
}
