//! Symmetric key types.
//!
//! All key material zeroizes on drop and never prints through `Debug`.

use blackkeep_core::Environment;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of every symmetric key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// A 256-bit AEAD key.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    bytes: [u8; KEY_SIZE],
}

impl SymmetricKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Fresh random key.
    pub fn generate<E: Environment>(env: &E) -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        env.random_bytes(&mut bytes);
        Self { bytes }
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// True once the key has been wiped.
    pub fn is_wiped(&self) -> bool {
        self.bytes.iter().all(|&b| b == 0)
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

/// Key that protects relay traffic for one room.
///
/// Derived from the room code alone, so every member holds it before any
/// Diffie-Hellman exchange. A distinct type keeps it from being passed where
/// a session key is expected.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SignalKey(SymmetricKey);

impl SignalKey {
    pub(crate) fn new(key: SymmetricKey) -> Self {
        Self(key)
    }

    pub(crate) fn key(&self) -> &SymmetricKey {
        &self.0
    }
}

impl std::fmt::Debug for SignalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SignalKey([REDACTED])")
    }
}
