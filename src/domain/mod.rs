// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Each aggregate has its own subdirectory with:
// - Value objects
// - Events
// - Commands
// - Errors
// - Aggregate implementation
// - Command handler
//
// This layer knows nothing about side-effect transport or storage backends.
//
// ============================================================================

pub mod order;
pub mod customer;
