// ============================================================================
// Infrastructure Actors
// ============================================================================
//
// Long-running background concerns:
// - Outbox redelivery
// - Loyalty points expiry
// - Health monitoring
// - Startup and shutdown of all of the above
//
// ============================================================================

mod coordinator;
mod expiry_sweeper;
mod health_monitor;
mod outbox_relay;

pub use coordinator::{BackgroundActors, Schedule};
pub use expiry_sweeper::{ExpirySweeperActor, SweepExpiredPoints};
pub use health_monitor::{GetSystemHealth, HealthMonitorActor, CheckComponents, SystemHealth, UpdateHealth};
pub use outbox_relay::{DrainOutbox, OutboxRelayActor};
