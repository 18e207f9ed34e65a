//! Authenticated-encryption framing using `ChaCha20-Poly1305`.
//!
//! Wire format (before base64):
//!
//! ```text
//! +-----------+--------------------------------+
//! | nonce[12] | ciphertext || tag[16]          |
//! +-----------+--------------------------------+
//! ```
//!
//! Every call draws a fresh 96-bit nonce from the environment's secure RNG;
//! there is no API that accepts a caller-chosen nonce, so nonce reuse under
//! one key cannot be expressed.
//!
//! Message traffic is padded (see [`crate::padding`]) before encryption.
//! Signal traffic is not: relay payloads are small and already bucketed by
//! the relay's record structure.

use base64::{Engine, engine::general_purpose::STANDARD};
use blackkeep_core::Environment;
use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};
use zeroize::Zeroizing;

use crate::{
    error::CryptoError,
    keys::{SignalKey, SymmetricKey},
    padding,
};

/// AEAD nonce size (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Poly1305 tag size.
pub const TAG_SIZE: usize = 16;

/// Encrypt raw bytes: `nonce || ciphertext || tag`.
pub fn seal<E: Environment>(key: &SymmetricKey, plaintext: &[u8], env: &E) -> Vec<u8> {
    let mut nonce = [0u8; NONCE_SIZE];
    env.random_bytes(&mut nonce);

    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    let Ok(ciphertext) = cipher.encrypt(Nonce::from_slice(&nonce), plaintext) else {
        unreachable!("ChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    let mut framed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    framed.extend_from_slice(&nonce);
    framed.extend_from_slice(&ciphertext);
    framed
}

/// Decrypt the output of [`seal`].
///
/// # Errors
///
/// - `DecryptionFailed`: input too short, or authentication tag mismatch
pub fn open(key: &SymmetricKey, framed: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if framed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::decryption("ciphertext shorter than nonce and tag"));
    }

    let (nonce, ciphertext) = framed.split_at(NONCE_SIZE);
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::decryption("authentication failed"))
}

/// Encrypt a UTF-8 message with length padding and encode it for transport.
///
/// `padding_block` is clamped to at least 512 bytes.
pub fn encrypt_message<E: Environment>(
    plaintext: &str,
    key: &SymmetricKey,
    padding_block: usize,
    env: &E,
) -> String {
    let padded = padding::pad(plaintext.as_bytes(), padding_block, env);
    STANDARD.encode(seal(key, &padded, env))
}

/// Inverse of [`encrypt_message`].
///
/// Either the full original plaintext comes back or an error; no partial
/// output on any failure path.
///
/// # Errors
///
/// - `DecryptionFailed`: bad transport encoding, authentication failure,
///   malformed padding, or non-UTF-8 content
pub fn decrypt_message(encoded: &str, key: &SymmetricKey) -> Result<String, CryptoError> {
    let framed = STANDARD
        .decode(encoded)
        .map_err(|_| CryptoError::decryption("invalid transport encoding"))?;

    let padded = open(key, &framed)?;
    let plaintext = padding::unpad(&padded)?;

    String::from_utf8(plaintext.to_vec())
        .map_err(|_| CryptoError::decryption("plaintext is not valid UTF-8"))
}

/// Encrypt a relay payload under the room's signal key (unpadded).
pub fn encrypt_signal<E: Environment>(plaintext: &[u8], key: &SignalKey, env: &E) -> String {
    STANDARD.encode(seal(key.key(), plaintext, env))
}

/// Inverse of [`encrypt_signal`].
///
/// # Errors
///
/// - `DecryptionFailed`: bad transport encoding or authentication failure
pub fn decrypt_signal(encoded: &str, key: &SignalKey) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let framed = STANDARD
        .decode(encoded)
        .map_err(|_| CryptoError::decryption("invalid transport encoding"))?;

    open(key.key(), &framed)
}
