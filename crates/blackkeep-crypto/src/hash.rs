//! SHA-256 helpers.

use std::fmt::Write as _;

use sha2::{Digest, Sha256};

/// SHA-256 of `data`.
pub fn digest(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Short human-comparable fingerprint of a pairwise session.
///
/// Hashes both exported public keys in sorted order, so both peers compute
/// the same value regardless of who is local. Rendered as the first 16 bytes
/// in upper-case hex, grouped in fours: `3F2A 9C01 ...`.
pub fn session_fingerprint(public_key_a: &str, public_key_b: &str) -> String {
    let (first, second) = if public_key_a <= public_key_b {
        (public_key_a, public_key_b)
    } else {
        (public_key_b, public_key_a)
    };

    let mut hasher = Sha256::new();
    hasher.update(first.as_bytes());
    hasher.update([0u8]);
    hasher.update(second.as_bytes());
    let hash: [u8; 32] = hasher.finalize().into();

    let mut rendered = String::with_capacity(39);
    for (i, pair) in hash[..16].chunks(2).enumerate() {
        if i > 0 {
            rendered.push(' ');
        }
        let _ = write!(rendered, "{:02X}{:02X}", pair[0], pair[1]);
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_matches_known_vector() {
        let hash = digest(b"abc");
        assert_eq!(hash[..4], [0xBA, 0x78, 0x16, 0xBF]);
    }

    #[test]
    fn fingerprint_is_order_independent() {
        assert_eq!(session_fingerprint("alpha", "beta"), session_fingerprint("beta", "alpha"));
        assert_ne!(session_fingerprint("alpha", "beta"), session_fingerprint("alpha", "gamma"));
    }

    #[test]
    fn fingerprint_format() {
        let fp = session_fingerprint("a", "b");
        assert_eq!(fp.len(), 39);
        assert_eq!(fp.split(' ').count(), 8);
        assert!(fp.chars().all(|c| c == ' ' || c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }
}
