use super::value_objects::LoyaltyPoints;

// ============================================================================
// Loyalty Business Rule Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LoyaltyError {
    #[error("Minimum redemption is {minimum} points, requested {requested}")]
    BelowMinimumRedemption { requested: i64, minimum: i64 },

    #[error("Insufficient points: requested {requested}, available {available}")]
    InsufficientPoints { requested: i64, available: i64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid points value: {0}")]
    InvalidPoints(i64),

    #[error("Loyalty account already open")]
    AccountAlreadyOpen,

    #[error("Ledger drift: stored {stored:?}, replayed {replayed:?}")]
    LedgerDrift {
        stored: LoyaltyPoints,
        replayed: LoyaltyPoints,
    },

    #[error("Aggregate not initialized")]
    NotInitialized,
}

impl LoyaltyError {
    pub fn code(&self) -> &'static str {
        match self {
            LoyaltyError::BelowMinimumRedemption { .. } => "BELOW_MINIMUM_REDEMPTION",
            LoyaltyError::InsufficientPoints { .. } => "INSUFFICIENT_POINTS",
            LoyaltyError::InvalidAmount(_) => "INVALID_AMOUNT",
            LoyaltyError::InvalidPoints(_) => "INVALID_POINTS",
            LoyaltyError::AccountAlreadyOpen => "ACCOUNT_ALREADY_OPEN",
            LoyaltyError::LedgerDrift { .. } => "LEDGER_DRIFT",
            LoyaltyError::NotInitialized => "ACCOUNT_NOT_INITIALIZED",
        }
    }
}
