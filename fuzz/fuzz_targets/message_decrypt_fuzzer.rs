//! Fuzz target for message and signal decryption
//!
//! # Strategy
//!
//! - Arbitrary text: random strings fed straight to the decoders
//! - Tampering: a genuine ciphertext with bytes flipped, truncated or extended
//!
//! # Invariants
//!
//! - NEVER panic on malformed input
//! - Tampered ciphertext either fails or (if the edit was a no-op) returns the
//!   exact original plaintext; never partial output

#![no_main]

use arbitrary::Arbitrary;
use blackkeep_crypto::{
    SymmetricKey, decrypt_message, decrypt_signal, derive_signal_key, encrypt_message,
};
use blackkeep_rendezvous::SystemEnv;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Input {
    RawText { text: String, key: [u8; 32] },
    Tamper { plaintext: String, edits: Vec<Edit> },
}

#[derive(Debug, Arbitrary)]
enum Edit {
    Flip { index: u16, mask: u8 },
    Truncate { len: u16 },
    Append { bytes: Vec<u8> },
}

fuzz_target!(|input: Input| {
    match input {
        Input::RawText { text, key } => {
            let _ = decrypt_message(&text, &SymmetricKey::from_bytes(key));
            let _ = decrypt_signal(&text, &derive_signal_key("K7H3MQXZ"));
        },
        Input::Tamper { plaintext, edits } => {
            let env = SystemEnv::new();
            let key = SymmetricKey::generate(&env);
            let sealed = encrypt_message(&plaintext, &key, 512, &env);

            let mut bytes = sealed.into_bytes();
            for edit in edits {
                match edit {
                    Edit::Flip { index, mask } => {
                        if !bytes.is_empty() {
                            let i = usize::from(index) % bytes.len();
                            bytes[i] ^= mask;
                        }
                    },
                    Edit::Truncate { len } => bytes.truncate(usize::from(len)),
                    Edit::Append { bytes: extra } => bytes.extend(extra),
                }
            }

            let Ok(text) = String::from_utf8(bytes) else {
                return;
            };
            if let Ok(opened) = decrypt_message(&text, &key) {
                assert_eq!(opened, plaintext, "tampered ciphertext produced different plaintext");
            }
        },
    }
});
