//! Blackkeep Cryptographic Primitives
//!
//! Key agreement, key derivation, hash ratchet and message codec for the
//! Blackkeep rendezvous protocol. All randomness comes from the caller's
//! [`Environment`](blackkeep_core::Environment), so every operation is
//! reproducible under a seeded simulation.
//!
//! # Key Lifecycle
//!
//! ```text
//! Room code ──HKDF("signal")──► Signal Key ──► relay traffic
//!
//! X25519(own private, peer public)
//!        │
//!        ▼
//! HKDF(salt) ─┬─ "encryption" ─► Initiator send / Responder receive
//!             ├─ "decryption" ─► Initiator receive / Responder send
//!             └─ "ratchet"    ─► Ratchet Seed
//!                                   │
//!                                   ▼
//!                 SHA-256 → next seed → HKDF(new salt) → next key set
//! ```
//!
//! The signal key exists before any Diffie-Hellman exchange, so the relay is
//! confidential from the first message. It only protects against parties
//! that do not know the room code.
//!
//! # Security
//!
//! Forward Secrecy:
//! - Ratchet advancement: the consumed seed is overwritten with random bytes
//!   then zeroed; old keys are zeroed
//! - A leaked seed at generation `n` reveals nothing below `n`
//!
//! No Post-Compromise Security:
//! - Ratchet steps add no fresh Diffie-Hellman input
//!
//! Authenticity:
//! - ChaCha20-Poly1305 AEAD, fresh 96-bit random nonce per call
//! - Failed authentication tag -> reject, no plaintext returned
//!
//! Length Hiding:
//! - Message plaintexts padded to multiples of the padding block

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod codec;
pub mod derivation;
pub mod error;
pub mod hash;
pub mod key_exchange;
pub mod keys;
pub mod padding;
pub mod password;
pub mod ratchet;

pub use codec::{
    NONCE_SIZE, TAG_SIZE, decrypt_message, decrypt_signal, encrypt_message, encrypt_signal,
};
pub use derivation::{
    DirectionalKeys, Role, SALT_SIZE, SEED_SIZE, SessionKeySet, derive_session_keys,
    derive_session_keys_with_salt, derive_signal_key,
};
pub use error::CryptoError;
pub use hash::session_fingerprint;
pub use key_exchange::{
    KeyExchangeContext, KeyPair, SharedSecret, derive_shared_secret, export_public_key,
    import_public_key,
};
pub use keys::{KEY_SIZE, SignalKey, SymmetricKey};
pub use password::{PBKDF2_ITERATIONS, PasswordHash, hash_password, verify_password};
pub use ratchet::{advance, advance_with_salt};
