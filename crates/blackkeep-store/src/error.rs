//! Store error types.

use thiserror::Error;

/// Errors from store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Transaction kept losing to concurrent writers.
    ///
    /// Conflicts are retried internally; this only surfaces once the retry
    /// budget is spent.
    #[error("transaction on {path} conflicted {attempts} times")]
    TransactionConflict {
        /// Path the transaction targeted
        path: String,
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Backend could not serve the request
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Record could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Path is empty or has an empty segment
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath {
        /// Offending path
        path: String,
        /// What is wrong with it
        reason: String,
    },

    /// Connection was closed; no further operations are accepted
    #[error("connection closed")]
    Disconnected,
}
