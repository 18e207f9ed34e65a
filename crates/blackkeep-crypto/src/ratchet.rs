//! One-way hash ratchet over a [`SessionKeySet`].
//!
//! ```text
//! seed(n) --SHA-256--> seed(n+1) --HKDF(salt(n+1))--> encryption(n+1)
//!                                                  \-> decryption(n+1)
//! ```
//!
//! Advancing gives forward secrecy: a leaked seed or key at generation `n`
//! says nothing about generations below `n`. It does not heal after a
//! compromise, because no fresh Diffie-Hellman input enters the chain.
//!
//! The peer that advances draws the salt ([`advance`]) and sends it; the other
//! peer replays the step with that salt ([`advance_with_salt`]). Both end up
//! with identical key sets.

use blackkeep_core::Environment;
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::{
    derivation::{SALT_SIZE, SEED_SIZE, SessionKeySet, key_set},
    error::CryptoError,
};

/// Advance under a fresh random salt.
///
/// On return the old set's seed and keys are wiped; only the returned set is
/// usable.
///
/// # Errors
///
/// - `GenerationOverflow`: the set has already advanced `u32::MAX` times
pub fn advance<E: Environment>(
    keys: &mut SessionKeySet,
    env: &E,
) -> Result<SessionKeySet, CryptoError> {
    let mut salt = [0u8; SALT_SIZE];
    env.random_bytes(&mut salt);
    advance_with_salt(keys, salt, env)
}

/// Advance under a salt chosen by the other peer.
///
/// # Errors
///
/// - `GenerationOverflow`: the set has already advanced `u32::MAX` times
pub fn advance_with_salt<E: Environment>(
    keys: &mut SessionKeySet,
    salt: [u8; SALT_SIZE],
    env: &E,
) -> Result<SessionKeySet, CryptoError> {
    let generation = keys
        .generation
        .checked_add(1)
        .ok_or(CryptoError::GenerationOverflow { current: keys.generation })?;

    let next_seed: [u8; SEED_SIZE] = Sha256::digest(keys.ratchet_seed).into();
    let hkdf = Hkdf::<Sha256>::new(Some(&salt), &next_seed);
    let next = key_set(&hkdf, salt, next_seed, generation);

    destroy(keys, env);
    Ok(next)
}

/// Overwrite the consumed seed with noise, then zero everything.
fn destroy<E: Environment>(keys: &mut SessionKeySet, env: &E) {
    env.random_bytes(&mut keys.ratchet_seed);
    keys.ratchet_seed.zeroize();
    keys.encryption_key.zeroize();
    keys.decryption_key.zeroize();
}

#[cfg(test)]
mod tests {
    use blackkeep_harness::SimEnv;

    use super::*;
    use crate::derivation::derive_session_keys_with_salt;

    #[test]
    fn advance_wipes_old_state() {
        let env = SimEnv::with_seed(21);
        let mut keys = derive_session_keys_with_salt(b"secret", [1; SALT_SIZE]);
        let original_seed = *keys.ratchet_seed();

        let next = advance(&mut keys, &env).unwrap();

        assert_eq!(keys.ratchet_seed(), &[0u8; SEED_SIZE]);
        assert!(keys.encryption_key().is_wiped());
        assert!(keys.decryption_key().is_wiped());
        assert_ne!(next.ratchet_seed(), &original_seed);
        assert_eq!(next.generation(), 1);
    }

    #[test]
    fn seed_is_hash_of_previous() {
        let env = SimEnv::with_seed(21);
        let mut keys = derive_session_keys_with_salt(b"secret", [1; SALT_SIZE]);
        let expected: [u8; SEED_SIZE] = Sha256::digest(keys.ratchet_seed()).into();

        let next = advance(&mut keys, &env).unwrap();
        assert_eq!(next.ratchet_seed(), &expected);
    }

    #[test]
    fn two_advances_never_repeat_a_seed() {
        let env = SimEnv::with_seed(22);
        let mut g0 = derive_session_keys_with_salt(b"secret", [3; SALT_SIZE]);
        let s0 = *g0.ratchet_seed();

        let mut g1 = advance(&mut g0, &env).unwrap();
        let s1 = *g1.ratchet_seed();
        let g2 = advance(&mut g1, &env).unwrap();
        let s2 = *g2.ratchet_seed();

        assert_ne!(s0, s1);
        assert_ne!(s0, s2);
        assert_ne!(s1, s2);
        assert_eq!(g1.ratchet_seed(), &[0u8; SEED_SIZE]);
    }

    #[test]
    fn peers_stay_in_step_with_shared_salt() {
        let env = SimEnv::with_seed(23);
        let mut alice = derive_session_keys_with_salt(b"secret", [5; SALT_SIZE]);
        let mut bob = derive_session_keys_with_salt(b"secret", [5; SALT_SIZE]);

        let alice_next = advance(&mut alice, &env).unwrap();
        let bob_next = advance_with_salt(&mut bob, *alice_next.salt(), &env).unwrap();

        assert_eq!(alice_next.encryption_key(), bob_next.encryption_key());
        assert_eq!(alice_next.decryption_key(), bob_next.decryption_key());
        assert_eq!(alice_next.ratchet_seed(), bob_next.ratchet_seed());
    }

    #[test]
    fn advanced_keys_match_fresh_derivation_from_next_seed() {
        let env = SimEnv::with_seed(25);
        let mut keys = derive_session_keys_with_salt(b"secret", [2; SALT_SIZE]);
        let next_seed: [u8; SEED_SIZE] = Sha256::digest(keys.ratchet_seed()).into();

        let next = advance_with_salt(&mut keys, [9; SALT_SIZE], &env).unwrap();
        let direct = derive_session_keys_with_salt(&next_seed, [9; SALT_SIZE]);

        assert_eq!(next.encryption_key(), direct.encryption_key());
        assert_eq!(next.decryption_key(), direct.decryption_key());
        assert_eq!(next.ratchet_seed(), &next_seed);
        assert_eq!(next.salt(), &[9; SALT_SIZE]);
    }

    #[test]
    fn generation_overflow_is_reported() {
        let env = SimEnv::with_seed(24);
        let mut keys = derive_session_keys_with_salt(b"secret", [0; SALT_SIZE]);
        keys.generation = u32::MAX;

        assert_eq!(
            advance(&mut keys, &env).unwrap_err(),
            CryptoError::GenerationOverflow { current: u32::MAX }
        );
        assert!(!keys.encryption_key().is_wiped());
    }
}
