use chrono::{DateTime, Utc};

// ============================================================================
// Health Check Abstractions
// ============================================================================

/// Health status of a component
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    /// Value exported on the health gauge
    pub fn as_gauge(&self) -> i64 {
        match self {
            HealthStatus::Unhealthy(_) => 0,
            HealthStatus::Degraded(_) => 1,
            HealthStatus::Healthy => 2,
        }
    }
}

/// Health information for a component
#[derive(Debug, Clone)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    pub details: Option<String>,
}

impl ComponentHealth {
    pub fn new(name: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            name: name.into(),
            status,
            last_check: Utc::now(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Worst status wins; an empty set is healthy
pub fn overall_status<'a>(components: impl IntoIterator<Item = &'a ComponentHealth>) -> HealthStatus {
    let mut degraded = Vec::new();
    let mut unhealthy = Vec::new();

    for health in components {
        match &health.status {
            HealthStatus::Unhealthy(msg) => unhealthy.push(format!("{}: {}", health.name, msg)),
            HealthStatus::Degraded(msg) => degraded.push(format!("{}: {}", health.name, msg)),
            HealthStatus::Healthy => {}
        }
    }

    if !unhealthy.is_empty() {
        unhealthy.sort();
        HealthStatus::Unhealthy(unhealthy.join(", "))
    } else if !degraded.is_empty() {
        degraded.sort();
        HealthStatus::Degraded(degraded.join(", "))
    } else {
        HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worst_component_decides() {
        let components = vec![
            ComponentHealth::new("outbox", HealthStatus::Degraded("2 dead letters".into())),
            ComponentHealth::new("redpanda", HealthStatus::Healthy),
        ];
        assert_eq!(overall_status(&components), HealthStatus::Degraded("outbox: 2 dead letters".into()));

        let components = vec![
            ComponentHealth::new("outbox", HealthStatus::Degraded("2 dead letters".into())),
            ComponentHealth::new("redpanda", HealthStatus::Unhealthy("circuit open".into())).with_details("5 failures"),
        ];
        let overall = overall_status(&components);
        assert_eq!(overall.as_gauge(), 0);
        assert!(!overall.is_healthy());
    }

    #[test]
    fn test_no_components_is_healthy() {
        assert_eq!(overall_status(&Vec::new()), HealthStatus::Healthy);
    }
}
