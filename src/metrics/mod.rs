// Private module declaration
mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Order status transitions and rejected commands
// - Side-effect dispatch outcomes and latency
// - Outbox retries and dead letters
// - Loyalty points posted by transaction kind
// - Circuit breaker state and overall health
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

/// Central metrics registry for the entire application
pub struct Metrics {
    registry: Registry,

    // Order Metrics
    pub order_transitions: IntCounterVec,
    pub commands_rejected: IntCounterVec,

    // Side Effect Metrics
    pub side_effects: IntCounterVec,
    pub side_effect_duration: HistogramVec,

    // Outbox Metrics
    pub outbox_retries: IntCounterVec,
    pub dead_letters_total: IntCounter,
    pub dead_letters_by_effect: IntCounterVec,

    // Loyalty Metrics
    pub loyalty_points: IntCounterVec,

    // Health Metrics
    pub circuit_breaker_state: IntGauge,
    pub health_status: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let order_transitions = IntCounterVec::new(
            Opts::new("order_transitions_total", "Committed order status transitions"),
            &["from", "to"],
        )?;
        registry.register(Box::new(order_transitions.clone()))?;

        let commands_rejected = IntCounterVec::new(
            Opts::new("commands_rejected_total", "Rejected commands by error code"),
            &["code"],
        )?;
        registry.register(Box::new(commands_rejected.clone()))?;

        let side_effects = IntCounterVec::new(
            Opts::new("side_effects_total", "Side-effect dispatch attempts by outcome"),
            &["effect_type", "outcome"],
        )?;
        registry.register(Box::new(side_effects.clone()))?;

        let side_effect_duration = HistogramVec::new(
            HistogramOpts::new("side_effect_duration_seconds", "Side-effect dispatch duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["effect_type"],
        )?;
        registry.register(Box::new(side_effect_duration.clone()))?;

        let outbox_retries = IntCounterVec::new(
            Opts::new("outbox_retries_total", "Outbox redelivery attempts"),
            &["effect_type"],
        )?;
        registry.register(Box::new(outbox_retries.clone()))?;

        let dead_letters_total = IntCounter::new("dead_letters_total", "Side effects moved to the dead-letter queue")?;
        registry.register(Box::new(dead_letters_total.clone()))?;

        let dead_letters_by_effect = IntCounterVec::new(
            Opts::new("dead_letters_by_effect", "Dead letters by effect type"),
            &["effect_type"],
        )?;
        registry.register(Box::new(dead_letters_by_effect.clone()))?;

        let loyalty_points = IntCounterVec::new(
            Opts::new("loyalty_points_posted_total", "Absolute loyalty points posted by transaction kind"),
            &["kind"],
        )?;
        registry.register(Box::new(loyalty_points.clone()))?;

        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Notification circuit breaker state (0=Closed, 1=HalfOpen, 2=Open)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let health_status = IntGauge::new(
            "health_status",
            "Overall health (0=Unhealthy, 1=Degraded, 2=Healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        Ok(Self {
            registry,
            order_transitions,
            commands_rejected,
            side_effects,
            side_effect_duration,
            outbox_retries,
            dead_letters_total,
            dead_letters_by_effect,
            loyalty_points,
            circuit_breaker_state,
            health_status,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_transition(&self, from: &str, to: &str) {
        self.order_transitions.with_label_values(&[from, to]).inc();
    }

    pub fn record_rejection(&self, code: &str) {
        self.commands_rejected.with_label_values(&[code]).inc();
    }

    pub fn record_side_effect(&self, effect_type: &str, outcome: &str, duration_secs: f64) {
        self.side_effects.with_label_values(&[effect_type, outcome]).inc();
        self.side_effect_duration.with_label_values(&[effect_type]).observe(duration_secs);
    }

    pub fn record_retry(&self, effect_type: &str, retries: u32) {
        self.outbox_retries.with_label_values(&[effect_type]).inc_by(u64::from(retries));
    }

    pub fn record_dead_letter(&self, effect_type: &str) {
        self.dead_letters_total.inc();
        self.dead_letters_by_effect.with_label_values(&[effect_type]).inc();
    }

    pub fn record_points(&self, kind: &str, points: i64) {
        self.loyalty_points.with_label_values(&[kind]).inc_by(points.unsigned_abs());
    }

    pub fn update_circuit_breaker_state(&self, state: i64) {
        self.circuit_breaker_state.set(state);
    }

    pub fn update_health_status(&self, status: i64) {
        self.health_status.set(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        metrics.record_transition("Received", "Pending");
        assert!(!metrics.registry.gather().is_empty());
    }

    #[test]
    fn test_record_transition() {
        let metrics = Metrics::new().unwrap();
        metrics.record_transition("Out for Delivery", "Delivered");
        metrics.record_transition("Out for Delivery", "Delivered");

        let gathered = metrics.registry.gather();
        let transitions = gathered.iter().find(|m| m.name() == "order_transitions_total").unwrap();
        assert_eq!(transitions.metric[0].counter.value, Some(2.0));
    }

    #[test]
    fn test_record_side_effects_by_outcome() {
        let metrics = Metrics::new().unwrap();
        metrics.record_side_effect("AdjustStock", "ok", 0.01);
        metrics.record_side_effect("AdjustStock", "failed", 0.02);

        let gathered = metrics.registry.gather();
        let effects = gathered.iter().find(|m| m.name() == "side_effects_total").unwrap();
        assert_eq!(effects.metric.len(), 2);
    }

    #[test]
    fn test_record_dead_letter() {
        let metrics = Metrics::new().unwrap();
        metrics.record_dead_letter("NotifyCustomer");
        metrics.record_dead_letter("AwardLoyaltyPoints");

        let gathered = metrics.registry.gather();
        let total = gathered.iter().find(|m| m.name() == "dead_letters_total").unwrap();
        assert_eq!(total.metric[0].counter.value, Some(2.0));
    }

    #[test]
    fn test_points_are_counted_as_magnitudes() {
        let metrics = Metrics::new().unwrap();
        metrics.record_points("redeemed", -120);
        metrics.record_points("redeemed", -30);

        let gathered = metrics.registry.gather();
        let points = gathered.iter().find(|m| m.name() == "loyalty_points_posted_total").unwrap();
        assert_eq!(points.metric[0].counter.value, Some(150.0));
    }
}
