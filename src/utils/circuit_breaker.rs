use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

// ============================================================================
// Circuit Breaker
// ============================================================================
//
// Wraps calls to an external transport (the notification producer). After
// `failure_threshold` consecutive failures calls are refused without touching
// the transport until `open_timeout` has passed; then a trial call decides
// whether to close again.
//
// States:
// - Closed: calls pass through
// - Open: calls refused immediately
// - HalfOpen: trial calls allowed, one failure reopens
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    /// Value exported on the circuit breaker gauge
    pub fn as_gauge(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_timeout: Duration,
    /// Trial successes needed to close from half-open
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    trial_successes: u32,
    opened_at: Option<Instant>,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    name: &'static str,
    inner: Arc<Mutex<Inner>>,
    config: CircuitBreakerConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit '{0}' is open")]
    CircuitOpen(&'static str),

    #[error(transparent)]
    OperationFailed(E),
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                trial_successes: 0,
                opened_at: None,
            })),
            config,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.admit().await?;

        match operation.await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(error) => {
                self.on_failure().await;
                Err(CircuitBreakerError::OperationFailed(error))
            }
        }
    }

    async fn admit<E>(&self) -> Result<(), CircuitBreakerError<E>> {
        let mut inner = self.inner.lock().await;
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let cooled_down = inner
            .opened_at
            .is_some_and(|opened| opened.elapsed() >= self.config.open_timeout);
        if !cooled_down {
            return Err(CircuitBreakerError::CircuitOpen(self.name));
        }

        tracing::info!(circuit = self.name, "Circuit half-open, allowing trial call");
        inner.state = CircuitState::HalfOpen;
        inner.trial_successes = 0;
        Ok(())
    }

    async fn on_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures = 0;

        if inner.state == CircuitState::HalfOpen {
            inner.trial_successes += 1;
            if inner.trial_successes >= self.config.success_threshold {
                tracing::info!(circuit = self.name, "✅ Circuit closed, transport recovered");
                inner.state = CircuitState::Closed;
                inner.trial_successes = 0;
                inner.opened_at = None;
            }
        }
    }

    async fn on_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures += 1;

        let trip = match inner.state {
            CircuitState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };

        if trip {
            tracing::warn!(
                circuit = self.name,
                failures = inner.consecutive_failures,
                "⚠️ Circuit opened"
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.trial_successes = 0;
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.inner.lock().await.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, open_timeout: Duration, success_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "notifications",
            CircuitBreakerConfig { failure_threshold, open_timeout, success_threshold },
        )
    }

    #[tokio::test]
    async fn test_opens_after_consecutive_failures() {
        let cb = breaker(3, Duration::from_secs(60), 1);

        for _ in 0..3 {
            assert!(cb.call(async { Err::<(), _>("broker down") }).await.is_err());
        }
        assert_eq!(cb.state().await, CircuitState::Open);

        let refused = cb.call(async { Ok::<_, &str>(()) }).await;
        assert!(matches!(refused, Err(CircuitBreakerError::CircuitOpen("notifications"))));
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let cb = breaker(2, Duration::from_secs(60), 1);

        let _ = cb.call(async { Err::<(), _>("timeout") }).await;
        let _ = cb.call(async { Ok::<_, &str>(()) }).await;
        let _ = cb.call(async { Err::<(), _>("timeout") }).await;

        assert_eq!(cb.state().await, CircuitState::Closed);
        assert_eq!(cb.consecutive_failures().await, 1);
    }

    #[tokio::test]
    async fn test_half_open_closes_after_trial_successes() {
        let cb = breaker(1, Duration::from_millis(50), 2);

        let _ = cb.call(async { Err::<(), _>("timeout") }).await;
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(cb.call(async { Ok::<_, &str>(()) }).await.is_ok());
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        assert!(cb.call(async { Ok::<_, &str>(()) }).await.is_ok());
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(1, Duration::from_millis(50), 2);

        let _ = cb.call(async { Err::<(), _>("timeout") }).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        let _ = cb.call(async { Err::<(), _>("still down") }).await;

        assert_eq!(cb.state().await, CircuitState::Open);
        assert_eq!(CircuitState::Open.as_gauge(), 2);
    }
}
