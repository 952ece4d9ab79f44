// ============================================================================
// Actors Module
// ============================================================================
//
// Actor-based infrastructure for background work.
//
// Structure:
// - core/           - Health types shared by the actors
// - infrastructure/ - Outbox relay, expiry sweeper, health monitor
//
// Note: Orders and loyalty accounts go through command handlers, NOT actors.
//       Actors are reserved for infrastructure concerns only.
//
// ============================================================================

mod core;
mod infrastructure;

pub use self::core::{ComponentHealth, HealthStatus};
pub use self::infrastructure::{
    BackgroundActors,
    DrainOutbox,
    ExpirySweeperActor,
    GetSystemHealth,
    HealthMonitorActor,
    OutboxRelayActor,
    CheckComponents,
    Schedule,
    SweepExpiredPoints,
    SystemHealth,
    UpdateHealth,
};
