use chrono::{DateTime, Duration, Utc};
use std::sync::RwLock;

/// Source of "now" for stamps, expiry and TTLs
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for deterministic tests and batch replays
#[derive(Debug)]
pub struct FixedClock {
    time: RwLock<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self { time: RwLock::new(time) }
    }

    pub fn set(&self, time: DateTime<Utc>) {
        *self.time.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = time;
    }

    pub fn advance(&self, by: Duration) {
        let mut time = self.time.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *time += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.time.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
