//! Crypto error types.

use thiserror::Error;

/// Errors from key exchange, derivation and the message codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Ciphertext could not be authenticated or decoded.
    ///
    /// Covers tampering, a wrong key, and corrupted transport. Never retry
    /// with the same key and ciphertext.
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Which check rejected the input
        reason: String,
    },

    /// Peer public key could not be parsed or is not a usable point
    #[error("invalid peer key: {reason}")]
    InvalidPeerKey {
        /// Which check rejected the key
        reason: String,
    },

    /// Ratchet generation counter would overflow
    #[error("ratchet generation overflow at {current}")]
    GenerationOverflow {
        /// Generation at which the advance was attempted
        current: u32,
    },

    /// Password hashing requested with too few iterations
    #[error("password hashing needs at least {minimum} iterations, got {iterations}")]
    WeakPasswordParameters {
        /// Requested iteration count
        iterations: u32,
        /// Required minimum
        minimum: u32,
    },
}

impl CryptoError {
    pub(crate) fn decryption(reason: &str) -> Self {
        Self::DecryptionFailed { reason: reason.to_string() }
    }

    pub(crate) fn peer_key(reason: &str) -> Self {
        Self::InvalidPeerKey { reason: reason.to_string() }
    }
}
