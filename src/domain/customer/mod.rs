// ============================================================================
// Customer Domain - Loyalty Account Aggregate
// ============================================================================
//
// This module contains ALL loyalty-specific code:
// - Configuration (LoyaltyConfig program constants)
// - Value objects (LoyaltyPoints, LoyaltyTransaction, PurchaseStats)
// - Events (TransactionPosted, PurchaseRecorded, etc.)
// - Commands (AwardPoints, RedeemPoints, ExpirePoints, etc.)
// - Errors (LoyaltyError enum)
// - Aggregate (CustomerAggregate ledger rules)
// - Command Handler (CustomerCommandHandler)
//
// ============================================================================

pub mod config;
pub mod value_objects;
pub mod events;
pub mod commands;
pub mod errors;
pub mod aggregate;
pub mod command_handler;

// Re-export for convenience
pub use config::*;
pub use value_objects::*;
pub use events::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
pub use command_handler::*;
