use serde::Serialize;
use uuid::Uuid;

use crate::domain::customer::LoyaltyError;
use crate::domain::order::OrderError;
use crate::event_sourcing::{ExecuteError, StoreError};

// ============================================================================
// Client-Facing Error Taxonomy
// ============================================================================
//
// Every rejection carries a stable machine-readable code. Internal errors
// keep their source for logs but never render it to the caller.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum FulfillmentError {
    #[error("{message}")]
    Validation { code: &'static str, message: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("{message}")]
    StateConflict { code: &'static str, message: String },

    #[error("Not allowed to {action}")]
    Authorization { action: &'static str },

    #[error("Internal error")]
    Internal(#[source] anyhow::Error),
}

/// Serializable body returned to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

impl FulfillmentError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        FulfillmentError::Validation { code, message: message.into() }
    }

    pub fn order_not_found(id: Uuid) -> Self {
        FulfillmentError::NotFound { entity: "Order", id }
    }

    pub fn forbidden(action: &'static str) -> Self {
        FulfillmentError::Authorization { action }
    }

    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        FulfillmentError::Internal(err.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            FulfillmentError::Validation { code, .. } => *code,
            FulfillmentError::NotFound { entity: "Customer", .. } => "CUSTOMER_NOT_FOUND",
            FulfillmentError::NotFound { .. } => "ORDER_NOT_FOUND",
            FulfillmentError::StateConflict { code, .. } => *code,
            FulfillmentError::Authorization { .. } => "FORBIDDEN",
            FulfillmentError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

impl From<OrderError> for FulfillmentError {
    fn from(err: OrderError) -> Self {
        if err.is_validation() {
            FulfillmentError::validation(err.code(), err.to_string())
        } else if matches!(err, OrderError::NotInitialized) {
            FulfillmentError::internal(err)
        } else {
            FulfillmentError::StateConflict {
                code: err.code(),
                message: err.to_string(),
            }
        }
    }
}

impl From<LoyaltyError> for FulfillmentError {
    fn from(err: LoyaltyError) -> Self {
        match err {
            LoyaltyError::BelowMinimumRedemption { .. }
            | LoyaltyError::InvalidAmount(_)
            | LoyaltyError::InvalidPoints(_) => FulfillmentError::validation(err.code(), err.to_string()),
            LoyaltyError::InsufficientPoints { .. } | LoyaltyError::AccountAlreadyOpen => {
                FulfillmentError::StateConflict {
                    code: err.code(),
                    message: err.to_string(),
                }
            }
            LoyaltyError::LedgerDrift { .. } | LoyaltyError::NotInitialized => FulfillmentError::internal(err),
        }
    }
}

impl From<StoreError> for FulfillmentError {
    fn from(err: StoreError) -> Self {
        FulfillmentError::internal(err)
    }
}

impl<E> From<ExecuteError<E>> for FulfillmentError
where
    E: std::error::Error + Send + Sync + 'static,
    FulfillmentError: From<E>,
{
    fn from(err: ExecuteError<E>) -> Self {
        match err {
            ExecuteError::Domain(e) => e.into(),
            ExecuteError::Store(e) => e.into(),
        }
    }
}
