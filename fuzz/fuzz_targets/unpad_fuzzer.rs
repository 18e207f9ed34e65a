//! Fuzz target for length-prefix unpadding
//!
//! # Invariants
//!
//! - NEVER panic or read past the buffer, whatever length the prefix claims
//! - A successful unpad returns a slice no longer than the body
//! - Padding any input and unpadding it returns the input

#![no_main]

use blackkeep_crypto::padding::{LENGTH_PREFIX_SIZE, pad, padded_len, unpad};
use blackkeep_rendezvous::SystemEnv;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(body) = unpad(data) {
        assert!(body.len() + LENGTH_PREFIX_SIZE <= data.len());
    }

    let padded = pad(data, 512, &SystemEnv::new());
    assert_eq!(padded.len(), padded_len(data.len(), 512));
    assert_eq!(unpad(&padded).ok(), Some(data));
});
