// ============================================================================
// External Collaborators
// ============================================================================
//
// Ports for the systems an order transition reaches out to:
// - inventory - stock decrement on delivery, restore on cancel
// - notifier  - customer notifications and verification-code purges
//
// Calls arrive through the outbox, so every implementation must tolerate
// seeing the same request more than once.
//
// ============================================================================

pub mod inventory;
pub mod notifier;

pub use inventory::{InMemoryInventory, InventoryService};
pub use notifier::{CustomerNotification, Notifier, RecordingNotifier, RedpandaNotifier};

use crate::utils::IsTransient;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CollaboratorError {
    /// Worth another attempt later (timeouts, broker down, circuit open)
    #[error("{service} unavailable: {message}")]
    Unavailable { service: &'static str, message: String },

    /// The collaborator refused the request; retrying will not help
    #[error("{service} rejected request: {message}")]
    Rejected { service: &'static str, message: String },
}

impl IsTransient for CollaboratorError {
    fn is_transient(&self) -> bool {
        matches!(self, CollaboratorError::Unavailable { .. })
    }
}
