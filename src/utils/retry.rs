use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

// ============================================================================
// Exponential Backoff Retry
// ============================================================================
//
// Used by the outbox relay to redeliver side effects. Only errors that report
// themselves as transient are retried; anything else stops immediately so it
// can be dead-lettered without waiting out the backoff.
//
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Side effects that must eventually land (loyalty, stock)
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }

    /// Cheap, best-effort calls (notifications)
    pub fn conservative() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Delay slept after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

#[derive(Debug, PartialEq)]
pub enum RetryResult<T, E> {
    Success { value: T, attempts: u32 },
    /// Still failing after `max_attempts`
    Exhausted { error: E, attempts: u32 },
    /// Error was not worth retrying
    Permanent { error: E, attempts: u32 },
}

impl<T, E> RetryResult<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryResult::Success { attempts, .. }
            | RetryResult::Exhausted { attempts, .. }
            | RetryResult::Permanent { attempts, .. } => *attempts,
        }
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryResult::Success { value, .. } => Ok(value),
            RetryResult::Exhausted { error, .. } | RetryResult::Permanent { error, .. } => Err(error),
        }
    }
}

/// Whether an error may succeed on a later attempt
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

/// Retry every failure until `max_attempts`
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    operation: F,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    run(operation_name, config, operation, |_| true).await
}

/// Retry only errors that report themselves transient
pub async fn retry_on_transient<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    operation: F,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display + IsTransient,
{
    run(operation_name, config, operation, |e: &E| e.is_transient()).await
}

async fn run<F, Fut, T, E, C>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
    retryable: C,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    C: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        let error = match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(operation = operation_name, attempt = attempt, "Succeeded after retry");
                }
                return RetryResult::Success { value, attempts: attempt };
            }
            Err(error) => error,
        };

        if !retryable(&error) {
            tracing::error!(
                operation = operation_name,
                attempt = attempt,
                error = %error,
                "Permanent failure, not retrying"
            );
            return RetryResult::Permanent { error, attempts: attempt };
        }

        if attempt >= config.max_attempts {
            tracing::error!(
                operation = operation_name,
                attempt = attempt,
                error = %error,
                "Giving up after all attempts"
            );
            return RetryResult::Exhausted { error, attempts: attempt };
        }

        let delay = config.delay_after(attempt);
        tracing::warn!(
            operation = operation_name,
            attempt = attempt,
            error = %error,
            delay_ms = delay.as_millis() as u64,
            "Transient failure, retrying after delay"
        );
        sleep(delay).await;
    }
}
