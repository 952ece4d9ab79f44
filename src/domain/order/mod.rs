// ============================================================================
// Order Domain - Business Logic for Order Aggregate
// ============================================================================
//
// This module contains ALL Order-specific code:
// - Value objects (CartLine, OrderTotals, OrderStatus, Requester)
// - Checklist (per-item collection tracking, DeliveryInfo)
// - Verification code (single-use delivery code)
// - Events (OrderPlaced, OrderDelivered, etc.)
// - Commands (PlaceOrder, ConfirmDelivery, etc.)
// - Errors (OrderError enum)
// - Aggregate (OrderAggregate state machine)
// - Command Handler (OrderCommandHandler)
//
// ============================================================================

pub mod value_objects;
pub mod checklist;
pub mod verification;
pub mod events;
pub mod commands;
pub mod errors;
pub mod aggregate;
pub mod command_handler;

// Re-export for convenience
pub use value_objects::*;
pub use checklist::*;
pub use verification::*;
pub use events::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
pub use command_handler::*;
