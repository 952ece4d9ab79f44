use uuid::Uuid;

use super::value_objects::OrderStatus;

// ============================================================================
// Order Business Rule Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error("Cannot move order from {from} to {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },

    #[error("Checklist incomplete, uncollected items: {}", .0.join(", "))]
    ChecklistIncomplete(Vec<String>),

    #[error("Verification code does not match")]
    InvalidVerificationCode,

    #[error("Verification code has already been used")]
    CodeAlreadyUsed,

    #[error("Product {0} is not on the checklist")]
    ProductNotInChecklist(Uuid),

    #[error("Checklist can only change while Processing, order is {0}")]
    InvalidOrderState(OrderStatus),

    #[error("Order is already cancelled")]
    AlreadyCancelled,

    #[error("Order cart cannot be empty")]
    EmptyCart,

    #[error("Invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity { product_id: Uuid, quantity: u32 },

    #[error("Product {0} appears on more than one cart line")]
    DuplicateCartLine(Uuid),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Order already exists")]
    AlreadyPlaced,

    #[error("Aggregate not initialized")]
    NotInitialized,
}

impl OrderError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            OrderError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            OrderError::ChecklistIncomplete(_) => "CHECKLIST_INCOMPLETE",
            OrderError::InvalidVerificationCode => "INVALID_VERIFICATION_CODE",
            OrderError::CodeAlreadyUsed => "CODE_ALREADY_USED",
            OrderError::ProductNotInChecklist(_) => "PRODUCT_NOT_IN_CHECKLIST",
            OrderError::InvalidOrderState(_) => "INVALID_ORDER_STATE",
            OrderError::AlreadyCancelled => "ALREADY_CANCELLED",
            OrderError::EmptyCart => "EMPTY_CART",
            OrderError::InvalidQuantity { .. } => "INVALID_QUANTITY",
            OrderError::DuplicateCartLine(_) => "DUPLICATE_CART_LINE",
            OrderError::InvalidAmount(_) => "INVALID_AMOUNT",
            OrderError::AlreadyPlaced => "ORDER_ALREADY_EXISTS",
            OrderError::NotInitialized => "ORDER_NOT_INITIALIZED",
        }
    }

    /// Malformed input rather than a conflict with current state
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            OrderError::EmptyCart
                | OrderError::InvalidQuantity { .. }
                | OrderError::DuplicateCartLine(_)
                | OrderError::InvalidAmount(_)
        )
    }
}
