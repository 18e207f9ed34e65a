//! PBKDF2-HMAC-SHA-256 credential hashing.

use base64::{Engine, engine::general_purpose::STANDARD};
use blackkeep_core::Environment;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Minimum (and default) PBKDF2 iteration count.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Password salt size.
pub const PASSWORD_SALT_SIZE: usize = 16;

/// Derived hash size.
pub const PASSWORD_HASH_SIZE: usize = 32;

/// A stored password hash. `hash` and `salt` are base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHash {
    /// Derived key (base64)
    pub hash: String,
    /// Random salt (base64)
    pub salt: String,
    /// Iteration count used to derive `hash`
    pub iterations: u32,
}

/// Hash a password under a fresh salt with [`PBKDF2_ITERATIONS`].
pub fn hash_password<E: Environment>(password: &str, env: &E) -> PasswordHash {
    let mut salt = [0u8; PASSWORD_SALT_SIZE];
    env.random_bytes(&mut salt);

    let hash = derive(password, &salt, PBKDF2_ITERATIONS);
    PasswordHash {
        hash: STANDARD.encode(*hash),
        salt: STANDARD.encode(salt),
        iterations: PBKDF2_ITERATIONS,
    }
}

/// Hash a password with an explicit iteration count.
///
/// # Errors
///
/// - `WeakPasswordParameters`: `iterations` below [`PBKDF2_ITERATIONS`]
pub fn hash_password_with_iterations<E: Environment>(
    password: &str,
    iterations: u32,
    env: &E,
) -> Result<PasswordHash, CryptoError> {
    if iterations < PBKDF2_ITERATIONS {
        return Err(CryptoError::WeakPasswordParameters {
            iterations,
            minimum: PBKDF2_ITERATIONS,
        });
    }

    let mut salt = [0u8; PASSWORD_SALT_SIZE];
    env.random_bytes(&mut salt);

    let hash = derive(password, &salt, iterations);
    Ok(PasswordHash { hash: STANDARD.encode(*hash), salt: STANDARD.encode(salt), iterations })
}

/// Check a password against a stored hash in constant time.
///
/// Malformed stored records and records below the iteration floor never
/// verify.
pub fn verify_password(password: &str, stored: &PasswordHash) -> bool {
    if stored.iterations < PBKDF2_ITERATIONS {
        return false;
    }
    let (Ok(salt), Ok(expected)) = (STANDARD.decode(&stored.salt), STANDARD.decode(&stored.hash))
    else {
        return false;
    };

    let candidate = derive(password, &salt, stored.iterations);
    candidate.as_slice().ct_eq(expected.as_slice()).into()
}

fn derive(password: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; PASSWORD_HASH_SIZE]> {
    let mut out = Zeroizing::new([0u8; PASSWORD_HASH_SIZE]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, out.as_mut());
    out
}
