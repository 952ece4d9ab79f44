use anyhow::{bail, Context, Result};
use std::str::FromStr;
use std::time::Duration;

use crate::utils::RetryConfig;

// ============================================================================
// Service Configuration
// ============================================================================
//
// Read once at startup from the environment. Unset variables fall back to
// local-development defaults; set but malformed values are an error.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Scylla,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "scylla" | "scylladb" => Ok(StoreBackend::Scylla),
            other => bail!("unknown store backend '{}', expected 'memory' or 'scylla'", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub store: StoreBackend,
    pub scylla_nodes: Vec<String>,
    pub scylla_keyspace: String,
    pub redpanda_brokers: String,
    pub notification_topic: String,
    pub redis_url: Option<String>,
    pub metrics_port: u16,
    pub outbox_poll_interval: Duration,
    pub points_expiry_interval: Duration,
    pub outbox_max_attempts: u32,
    pub outbox_claim_lease: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreBackend::Memory,
            scylla_nodes: vec!["127.0.0.1:9042".to_string()],
            scylla_keyspace: "fulfillment_ks".to_string(),
            redpanda_brokers: "127.0.0.1:9092".to_string(),
            notification_topic: "customer-notifications".to_string(),
            redis_url: None,
            metrics_port: 9090,
            outbox_poll_interval: Duration::from_secs(2),
            points_expiry_interval: Duration::from_secs(3600),
            outbox_max_attempts: 5,
            outbox_claim_lease: Duration::from_secs(60),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; tests pass a map instead of the process env
    pub fn from_lookup<L>(lookup: L) -> Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let store = match get("FULFILLMENT_STORE") {
            Some(value) => value.parse().context("FULFILLMENT_STORE")?,
            None => defaults.store,
        };

        let scylla_nodes = match get("SCYLLA_NODES") {
            Some(value) => {
                let nodes: Vec<String> = value
                    .split(',')
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .collect();
                if nodes.is_empty() {
                    bail!("SCYLLA_NODES must list at least one node");
                }
                nodes
            }
            None => defaults.scylla_nodes,
        };

        let outbox_max_attempts: u32 = parse_or(&get, "OUTBOX_MAX_ATTEMPTS", defaults.outbox_max_attempts)?;
        if outbox_max_attempts == 0 {
            bail!("OUTBOX_MAX_ATTEMPTS must be at least 1");
        }

        let outbox_claim_lease: u64 =
            parse_or(&get, "OUTBOX_CLAIM_LEASE_SECS", defaults.outbox_claim_lease.as_secs())?;
        if outbox_claim_lease == 0 {
            bail!("OUTBOX_CLAIM_LEASE_SECS must be at least 1");
        }

        Ok(Self {
            store,
            scylla_nodes,
            scylla_keyspace: get("SCYLLA_KEYSPACE").unwrap_or(defaults.scylla_keyspace),
            redpanda_brokers: get("REDPANDA_BROKERS").unwrap_or(defaults.redpanda_brokers),
            notification_topic: get("NOTIFICATION_TOPIC").unwrap_or(defaults.notification_topic),
            redis_url: get("REDIS_URL"),
            metrics_port: parse_or(&get, "METRICS_PORT", defaults.metrics_port)?,
            outbox_poll_interval: Duration::from_secs(parse_or(
                &get,
                "OUTBOX_POLL_INTERVAL_SECS",
                defaults.outbox_poll_interval.as_secs(),
            )?),
            points_expiry_interval: Duration::from_secs(parse_or(
                &get,
                "POINTS_EXPIRY_INTERVAL_SECS",
                defaults.points_expiry_interval.as_secs(),
            )?),
            outbox_max_attempts,
            outbox_claim_lease: Duration::from_secs(outbox_claim_lease),
        })
    }

    /// Claim lease in the form the stores take
    pub fn claim_lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.outbox_claim_lease.as_secs() as i64)
    }

    /// Backoff used by the outbox relay for redelivery
    pub fn relay_retry(&self) -> RetryConfig {
        RetryConfig::aggressive().with_max_attempts(self.outbox_max_attempts)
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{} has invalid value '{}': {}", key, raw, e)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.relay_retry().max_attempts, 5);
    }

    #[test]
    fn test_reads_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("FULFILLMENT_STORE", "scylla"),
            ("SCYLLA_NODES", "10.0.0.1:9042, 10.0.0.2:9042"),
            ("REDIS_URL", "redis://127.0.0.1/"),
            ("METRICS_PORT", "9100"),
            ("OUTBOX_POLL_INTERVAL_SECS", "5"),
            ("OUTBOX_MAX_ATTEMPTS", "8"),
            ("OUTBOX_CLAIM_LEASE_SECS", "120"),
        ]))
        .unwrap();

        assert_eq!(config.store, StoreBackend::Scylla);
        assert_eq!(config.scylla_nodes, vec!["10.0.0.1:9042", "10.0.0.2:9042"]);
        assert_eq!(config.redis_url.as_deref(), Some("redis://127.0.0.1/"));
        assert_eq!(config.metrics_port, 9100);
        assert_eq!(config.outbox_poll_interval, Duration::from_secs(5));
        assert_eq!(config.relay_retry().max_attempts, 8);
        assert_eq!(config.claim_lease(), chrono::Duration::seconds(120));
    }

    #[test]
    fn test_malformed_values_are_rejected() {
        assert!(AppConfig::from_lookup(lookup(&[("METRICS_PORT", "ninety")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("FULFILLMENT_STORE", "postgres")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("OUTBOX_MAX_ATTEMPTS", "0")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("OUTBOX_CLAIM_LEASE_SECS", "0")])).is_err());
    }
}
