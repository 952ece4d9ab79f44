// ============================================================================
// Event Sourcing Infrastructure
// ============================================================================
//
// Generic, reusable event sourcing infrastructure.
// Domain-specific code is in src/domain/
//
// ============================================================================

pub mod core;
pub mod store;
pub mod repository;

pub use self::core::*;
pub use store::*;
pub use repository::{CommandOutcome, ExecuteError, OutboxDraft, Repository};
