//! Error types for credit ledger storage.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Record key.
        id: String,
    },

    /// A unique key is already taken.
    #[error("duplicate {index} key: {key}")]
    DuplicateKey {
        /// Which uniqueness constraint was violated.
        index: &'static str,
        /// The conflicting key.
        key: String,
    },

    /// Lock contention; the transaction was rolled back and may be retried.
    #[error("transaction conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    /// Whether retrying the whole transaction may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<StoreError> for credit_ledger_core::BillingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound {
                entity: "account",
                id,
            } => Self::AccountNotFound { account_id: id },
            StoreError::Conflict(key) => Self::Conflict { account_id: key },
            other => Self::Storage(other.to_string()),
        }
    }
}
