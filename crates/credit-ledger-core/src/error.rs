//! Error types for the credit ledger.

use crate::ids::IdError;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Errors that can occur in ledger operations.
///
/// Duplicate deliveries and insufficient balances are deliberately absent:
/// they are ordinary outcomes, reported through `GrantOutcome` and
/// `ChargeOutcome`.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// Account not found.
    #[error("account not found: {account_id}")]
    AccountNotFound {
        /// The account that was not found.
        account_id: String,
    },

    /// Amount is zero or otherwise unusable.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Idempotency key is empty or malformed.
    #[error("invalid idempotency key: {0}")]
    InvalidIdempotencyKey(String),

    /// Static configuration is inconsistent.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// The store kept reporting lock conflicts after all retries.
    #[error("transaction conflict on account {account_id}")]
    Conflict {
        /// The contended account.
        account_id: String,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),
}
