//! Length-hiding padding for message plaintexts.
//!
//! Layout of a padded buffer:
//!
//! ```text
//! +-------------+-----------------+------------------------+
//! | len: u32 BE | plaintext[len]  | random filler          |
//! +-------------+-----------------+------------------------+
//! |<----------- multiple of the padding block ------------>|
//! ```
//!
//! Ciphertext length then reveals only which block-sized bucket a message
//! falls into.

use blackkeep_core::{Environment, MIN_PADDING_BLOCK};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Padded size for a plaintext of `plaintext_len` bytes.
///
/// Always a non-zero multiple of `block` (clamped to at least
/// [`MIN_PADDING_BLOCK`]).
pub fn padded_len(plaintext_len: usize, block: usize) -> usize {
    let block = block.max(MIN_PADDING_BLOCK);
    let needed = LENGTH_PREFIX_SIZE + plaintext_len;
    needed.div_ceil(block) * block
}

/// Pad `plaintext` to the next multiple of `block`.
///
/// Plaintexts longer than `u32::MAX` bytes are not representable in the
/// prefix; callers never produce those.
pub fn pad<E: Environment>(plaintext: &[u8], block: usize, env: &E) -> Zeroizing<Vec<u8>> {
    debug_assert!(u32::try_from(plaintext.len()).is_ok());

    let total = padded_len(plaintext.len(), block);
    let mut padded = Zeroizing::new(vec![0u8; total]);

    padded[..LENGTH_PREFIX_SIZE].copy_from_slice(&(plaintext.len() as u32).to_be_bytes());
    let body_end = LENGTH_PREFIX_SIZE + plaintext.len();
    padded[LENGTH_PREFIX_SIZE..body_end].copy_from_slice(plaintext);
    env.random_bytes(&mut padded[body_end..]);

    padded
}

/// Strip padding, returning the original plaintext slice.
///
/// Rejects buffers whose declared length does not fit.
pub fn unpad(padded: &[u8]) -> Result<&[u8], CryptoError> {
    let Some((prefix, body)) = padded.split_first_chunk::<LENGTH_PREFIX_SIZE>() else {
        return Err(CryptoError::decryption("padded block shorter than length prefix"));
    };

    let declared = u32::from_be_bytes(*prefix) as usize;
    body.get(..declared)
        .ok_or_else(|| CryptoError::decryption("declared length exceeds padded block"))
}

#[cfg(test)]
mod tests {
    use blackkeep_harness::SimEnv;

    use super::*;

    #[test]
    fn padded_len_boundaries() {
        assert_eq!(padded_len(0, 512), 512);
        assert_eq!(padded_len(1, 512), 512);
        assert_eq!(padded_len(508, 512), 512);
        assert_eq!(padded_len(509, 512), 1024);
        assert_eq!(padded_len(511, 512), 1024);
        assert_eq!(padded_len(512, 512), 1024);
        assert_eq!(padded_len(5000, 512), 5120);
    }

    #[test]
    fn padded_len_clamps_small_blocks() {
        assert_eq!(padded_len(10, 16), 512);
    }

    #[test]
    fn larger_blocks_are_honored() {
        assert_eq!(padded_len(10, 4096), 4096);
        assert_eq!(padded_len(4093, 4096), 8192);
    }

    #[test]
    fn pad_then_unpad() {
        let env = SimEnv::with_seed(9);
        let padded = pad(b"hello", 512, &env);

        assert_eq!(padded.len(), 512);
        assert_eq!(&padded[..4], &[0, 0, 0, 5]);
        assert_eq!(unpad(&padded).unwrap(), b"hello");
    }

    #[test]
    fn filler_is_random() {
        let env = SimEnv::with_seed(9);
        let a = pad(b"", 512, &env);
        let b = pad(b"", 512, &env);
        assert_ne!(a[4..], b[4..]);
    }

    #[test]
    fn unpad_rejects_short_buffer() {
        assert!(matches!(unpad(&[0, 0]), Err(CryptoError::DecryptionFailed { .. })));
    }

    #[test]
    fn unpad_rejects_overlong_length() {
        let mut block = vec![0u8; 512];
        block[..4].copy_from_slice(&600u32.to_be_bytes());
        assert!(matches!(unpad(&block), Err(CryptoError::DecryptionFailed { .. })));
    }
}
