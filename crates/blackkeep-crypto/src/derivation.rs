//! Key derivation using HKDF-SHA-256.
//!
//! Session keys come from the Diffie-Hellman shared secret under a random
//! salt. Each output is bound to its own context label, so knowing one
//! derived key reveals nothing about the others without the input secret.

use blackkeep_core::Environment;
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::keys::{KEY_SIZE, SignalKey, SymmetricKey};

/// Salt size for session derivation (256 bits).
pub const SALT_SIZE: usize = 32;

/// Ratchet seed size (256 bits).
pub const SEED_SIZE: usize = 32;

/// Label for the key the initiator sends with.
pub const ENCRYPTION_LABEL: &[u8] = b"encryption";

/// Label for the key the initiator receives with.
pub const DECRYPTION_LABEL: &[u8] = b"decryption";

/// Label for the ratchet seed.
pub const RATCHET_LABEL: &[u8] = b"ratchet";

/// Label for the room signal key.
const SIGNAL_LABEL: &[u8] = b"signal";

/// Fixed salt for signal key derivation (the room code is the only input).
const SIGNAL_SALT: &[u8] = b"blackkeep-signal-v1";

/// Which side of a pairwise exchange a peer is on.
///
/// Both peers derive the same two labeled keys, so they must agree on who
/// sends with which. The peer with the lexicographically smaller id is the
/// initiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Draws the salt; sends with the `encryption` key
    Initiator,
    /// Receives the salt; sends with the `decryption` key
    Responder,
}

impl Role {
    /// Role of `own` in a pair with `other`.
    ///
    /// Ids must differ; equal ids yield `Initiator` on both sides.
    pub fn for_pair(own: &str, other: &str) -> Self {
        if own <= other { Self::Initiator } else { Self::Responder }
    }
}

/// Live key material for one pairwise session.
///
/// `encryption_key` and `decryption_key` are named after their derivation
/// labels, not after a direction; use [`SessionKeySet::directional`] to get
/// the send/receive assignment for a [`Role`].
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKeySet {
    pub(crate) encryption_key: SymmetricKey,
    pub(crate) decryption_key: SymmetricKey,
    pub(crate) ratchet_seed: [u8; SEED_SIZE],
    #[zeroize(skip)]
    pub(crate) salt: [u8; SALT_SIZE],
    #[zeroize(skip)]
    pub(crate) generation: u32,
}

impl SessionKeySet {
    /// Key derived under the `encryption` label.
    pub fn encryption_key(&self) -> &SymmetricKey {
        &self.encryption_key
    }

    /// Key derived under the `decryption` label.
    pub fn decryption_key(&self) -> &SymmetricKey {
        &self.decryption_key
    }

    /// Current ratchet seed.
    ///
    /// Exposed for verification only; never log it.
    pub fn ratchet_seed(&self) -> &[u8; SEED_SIZE] {
        &self.ratchet_seed
    }

    /// Salt this set was derived under. Not secret.
    pub fn salt(&self) -> &[u8; SALT_SIZE] {
        &self.salt
    }

    /// Number of ratchet steps since the initial derivation.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Send/receive keys for `role`.
    pub fn directional(&self, role: Role) -> DirectionalKeys<'_> {
        match role {
            Role::Initiator => {
                DirectionalKeys { send: &self.encryption_key, receive: &self.decryption_key }
            },
            Role::Responder => {
                DirectionalKeys { send: &self.decryption_key, receive: &self.encryption_key }
            },
        }
    }
}

impl std::fmt::Debug for SessionKeySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeySet")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Borrowed send/receive view of a [`SessionKeySet`].
#[derive(Debug, Clone, Copy)]
pub struct DirectionalKeys<'a> {
    /// Key for outgoing messages
    pub send: &'a SymmetricKey,
    /// Key for incoming messages
    pub receive: &'a SymmetricKey,
}

/// Derive a session key set under a fresh random salt.
///
/// Two calls with the same secret produce different salts and therefore
/// different keys. The salt must reach the other peer (see
/// [`derive_session_keys_with_salt`]).
pub fn derive_session_keys<E: Environment>(shared_secret: &[u8], env: &E) -> SessionKeySet {
    let mut salt = [0u8; SALT_SIZE];
    env.random_bytes(&mut salt);
    derive_session_keys_with_salt(shared_secret, salt)
}

/// Derive a session key set under a salt received from the other peer.
pub fn derive_session_keys_with_salt(
    input_key_material: &[u8],
    salt: [u8; SALT_SIZE],
) -> SessionKeySet {
    let hkdf = Hkdf::<Sha256>::new(Some(&salt), input_key_material);
    key_set(&hkdf, salt, expand(&hkdf, RATCHET_LABEL), 0)
}

/// Traffic keys expanded from `hkdf`, with the caller's seed and generation.
pub(crate) fn key_set(
    hkdf: &Hkdf<Sha256>,
    salt: [u8; SALT_SIZE],
    ratchet_seed: [u8; SEED_SIZE],
    generation: u32,
) -> SessionKeySet {
    SessionKeySet {
        encryption_key: SymmetricKey::from_bytes(expand(hkdf, ENCRYPTION_LABEL)),
        decryption_key: SymmetricKey::from_bytes(expand(hkdf, DECRYPTION_LABEL)),
        ratchet_seed,
        salt,
        generation,
    }
}

/// Derive the relay key for a room from its code alone.
///
/// Deterministic: every member computes the same key.
pub fn derive_signal_key(room_code: &str) -> SignalKey {
    let hkdf = Hkdf::<Sha256>::new(Some(SIGNAL_SALT), room_code.as_bytes());
    SignalKey::new(SymmetricKey::from_bytes(expand(&hkdf, SIGNAL_LABEL)))
}

fn expand(hkdf: &Hkdf<Sha256>, label: &[u8]) -> [u8; KEY_SIZE] {
    let mut okm = [0u8; KEY_SIZE];
    let Ok(()) = hkdf.expand(label, &mut okm) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };
    okm
}
