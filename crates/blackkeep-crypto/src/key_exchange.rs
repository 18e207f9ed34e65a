//! X25519 key agreement.
//!
//! Each peer holds one [`KeyExchangeContext`] per room: a key pair whose
//! private half never leaves this module, the exported public key that goes
//! into the member entry, and the room's [`SignalKey`].

use base64::{Engine, engine::general_purpose::STANDARD};
use blackkeep_core::Environment;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    derivation::{self, SessionKeySet},
    error::CryptoError,
    keys::SignalKey,
};

/// Size of an X25519 public key.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of the raw Diffie-Hellman output.
pub const SHARED_SECRET_SIZE: usize = 32;

/// An X25519 key pair.
///
/// The private scalar is not accessible; the only operation that uses it is
/// [`derive_shared_secret`].
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Fresh key pair from the environment's secure RNG.
    pub fn generate<E: Environment>(env: &E) -> Self {
        let mut bytes = [0u8; 32];
        env.random_bytes(&mut bytes);
        let secret = StaticSecret::from(bytes);
        bytes.zeroize();

        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Public half as raw bytes.
    pub fn public_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        self.public.as_bytes()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &export_public_key(self))
            .finish_non_exhaustive()
    }
}

/// Raw Diffie-Hellman output. Input key material for
/// [`derive_session_keys`](crate::derive_session_keys) only.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; SHARED_SECRET_SIZE]);

impl SharedSecret {
    /// Raw secret bytes.
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret([REDACTED])")
    }
}

/// Encode a key pair's public half for transport.
pub fn export_public_key(key_pair: &KeyPair) -> String {
    STANDARD.encode(key_pair.public.as_bytes())
}

/// Decode a transported public key.
///
/// # Errors
///
/// - `InvalidPeerKey`: not base64, or not exactly 32 bytes
pub fn import_public_key(encoded: &str) -> Result<PublicKey, CryptoError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|_| CryptoError::peer_key("public key is not valid base64"))?;

    let bytes: [u8; PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|bytes: Vec<u8>| {
        CryptoError::InvalidPeerKey {
            reason: format!("public key must be {PUBLIC_KEY_SIZE} bytes, got {}", bytes.len()),
        }
    })?;

    Ok(PublicKey::from(bytes))
}

/// Compute the shared secret between our key pair and a peer's exported key.
///
/// # Errors
///
/// - `InvalidPeerKey`: key fails to import, or is a low-order point that
///   would make the result independent of our private key
pub fn derive_shared_secret(
    own: &KeyPair,
    peer_public_encoded: &str,
) -> Result<SharedSecret, CryptoError> {
    let peer = import_public_key(peer_public_encoded)?;
    let shared = own.secret.diffie_hellman(&peer);

    if !shared.was_contributory() {
        return Err(CryptoError::peer_key("public key is a low-order point"));
    }

    Ok(SharedSecret(shared.to_bytes()))
}

/// Per-room key exchange state for one peer.
#[derive(Debug)]
pub struct KeyExchangeContext {
    key_pair: KeyPair,
    public_key: String,
    signal_key: SignalKey,
}

impl KeyExchangeContext {
    /// Fresh key pair plus the signal key for `room_code`.
    pub fn new<E: Environment>(room_code: &str, env: &E) -> Self {
        Self::with_key_pair(KeyPair::generate(env), room_code)
    }

    /// Bind an existing key pair to `room_code`.
    ///
    /// A room creator publishes its public key before the code exists, so
    /// the pair comes first and the room second.
    pub fn with_key_pair(key_pair: KeyPair, room_code: &str) -> Self {
        let public_key = export_public_key(&key_pair);
        let signal_key = derivation::derive_signal_key(room_code);
        Self { key_pair, public_key, signal_key }
    }

    /// Exported public key (base64).
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Relay key for this context's room.
    pub fn signal_key(&self) -> &SignalKey {
        &self.signal_key
    }

    /// Shared secret with a peer.
    ///
    /// # Errors
    ///
    /// - `InvalidPeerKey`: see [`derive_shared_secret`]
    pub fn shared_secret(&self, peer_public_encoded: &str) -> Result<SharedSecret, CryptoError> {
        derive_shared_secret(&self.key_pair, peer_public_encoded)
    }

    /// Initiator side: shared secret, then keys under a fresh salt.
    ///
    /// # Errors
    ///
    /// - `InvalidPeerKey`: see [`derive_shared_secret`]
    pub fn initiate<E: Environment>(
        &self,
        peer_public_encoded: &str,
        env: &E,
    ) -> Result<SessionKeySet, CryptoError> {
        let secret = self.shared_secret(peer_public_encoded)?;
        Ok(derivation::derive_session_keys(secret.as_bytes(), env))
    }

    /// Responder side: shared secret, then keys under the initiator's salt.
    ///
    /// # Errors
    ///
    /// - `InvalidPeerKey`: see [`derive_shared_secret`]
    pub fn respond(
        &self,
        peer_public_encoded: &str,
        salt: [u8; derivation::SALT_SIZE],
    ) -> Result<SessionKeySet, CryptoError> {
        let secret = self.shared_secret(peer_public_encoded)?;
        Ok(derivation::derive_session_keys_with_salt(secret.as_bytes(), salt))
    }
}

#[cfg(test)]
mod tests {
    use blackkeep_harness::SimEnv;

    use super::*;

    #[test]
    fn both_sides_compute_same_secret() {
        let env = SimEnv::with_seed(11);
        let alice = KeyPair::generate(&env);
        let bob = KeyPair::generate(&env);

        let ab = derive_shared_secret(&alice, &export_public_key(&bob)).unwrap();
        let ba = derive_shared_secret(&bob, &export_public_key(&alice)).unwrap();

        assert_eq!(ab.as_bytes(), ba.as_bytes());
    }

    #[test]
    fn export_is_base64_of_32_bytes() {
        let env = SimEnv::with_seed(11);
        let pair = KeyPair::generate(&env);
        let exported = export_public_key(&pair);

        assert_eq!(exported.len(), 44);
        assert_eq!(import_public_key(&exported).unwrap().as_bytes(), pair.public_bytes());
    }

    #[test]
    fn import_rejects_bad_encoding() {
        assert!(matches!(
            import_public_key("%%%"),
            Err(CryptoError::InvalidPeerKey { reason }) if reason.contains("base64")
        ));
    }

    #[test]
    fn import_rejects_wrong_length() {
        let short = STANDARD.encode([1u8; 31]);
        assert!(matches!(
            import_public_key(&short),
            Err(CryptoError::InvalidPeerKey { reason }) if reason.contains("31")
        ));
    }

    #[test]
    fn rejects_low_order_point() {
        let env = SimEnv::with_seed(11);
        let pair = KeyPair::generate(&env);
        let identity = STANDARD.encode([0u8; 32]);

        assert!(matches!(
            derive_shared_secret(&pair, &identity),
            Err(CryptoError::InvalidPeerKey { reason }) if reason.contains("low-order")
        ));
    }

    #[test]
    fn initiate_and_respond_agree() {
        let env = SimEnv::with_seed(12);
        let alice = KeyExchangeContext::new("K7H3MQXZ", &env);
        let bob = KeyExchangeContext::new("K7H3MQXZ", &env);

        let initiator = alice.initiate(bob.public_key(), &env).unwrap();
        let responder = bob.respond(alice.public_key(), *initiator.salt()).unwrap();

        assert_eq!(initiator.encryption_key(), responder.encryption_key());
        assert_eq!(initiator.decryption_key(), responder.decryption_key());
        assert_eq!(alice.signal_key(), bob.signal_key());
    }

    #[test]
    fn debug_shows_only_public_key() {
        let env = SimEnv::with_seed(13);
        let pair = KeyPair::generate(&env);
        let rendered = format!("{pair:?}");
        assert!(rendered.contains(&export_public_key(&pair)));
    }
}
