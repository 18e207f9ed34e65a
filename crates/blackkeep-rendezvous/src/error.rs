//! Rendezvous error types.

use blackkeep_core::{ConfigError, IdError};
use blackkeep_crypto::CryptoError;
use blackkeep_store::StoreError;
use thiserror::Error;

/// Errors surfaced by room lifecycle, relay and session operations.
///
/// Absent and expired rooms both map to [`RendezvousError::RoomNotFound`];
/// callers cannot tell them apart.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RendezvousError {
    /// Malformed room code, peer id or configuration.
    ///
    /// Caller error. Never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Room does not exist or has expired
    #[error("room not found")]
    RoomNotFound,

    /// Room hit the failed-attempt threshold.
    ///
    /// Terminal: a locked room is never unlocked, only destroyed.
    #[error("room is locked")]
    RoomLocked,

    /// Every generated code collided with a live room
    #[error("no free room code after {attempts} attempts")]
    RoomCodeExhausted {
        /// Codes tried
        attempts: u32,
    },

    /// Ciphertext failed authentication.
    ///
    /// May indicate tampering. Never retried with the same key and input.
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Which check rejected the input
        reason: String,
    },

    /// Peer key material is malformed
    #[error("invalid peer key: {reason}")]
    InvalidPeerKey {
        /// Which check rejected the key
        reason: String,
    },

    /// Handshake did not complete (timeout, protocol violation, ratchet
    /// mismatch)
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Signal message could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl RendezvousError {
    /// True if repeating the same call may succeed.
    ///
    /// Only transient store failures qualify. Conflicts are already retried
    /// inside the store, but a caller may try again once contention drops.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::Unavailable(_) | StoreError::TransactionConflict { .. })
        )
    }
}

impl From<IdError> for RendezvousError {
    fn from(err: IdError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

impl From<ConfigError> for RendezvousError {
    fn from(err: ConfigError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

impl From<CryptoError> for RendezvousError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::DecryptionFailed { reason } => Self::DecryptionFailed { reason },
            CryptoError::InvalidPeerKey { reason } => Self::InvalidPeerKey { reason },
            other => Self::Handshake(other.to_string()),
        }
    }
}
