//! Fuzz target for CBOR signal message decoding
//!
//! Signal payloads are authenticated before decoding, but a peer holding the
//! room code can seal anything, so the decoder still sees hostile CBOR.
//!
//! # Invariants
//!
//! - NEVER panic on malformed CBOR (deep nesting, huge claimed lengths)
//! - Decoded messages re-encode and decode to the same value

#![no_main]

use blackkeep_rendezvous::SignalMessage;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(message) = ciborium::from_reader::<SignalMessage, _>(data) else {
        return;
    };

    let mut encoded = Vec::new();
    ciborium::into_writer(&message, &mut encoded).expect("decoded message re-encodes");
    let again: SignalMessage =
        ciborium::from_reader(encoded.as_slice()).expect("re-encoded message decodes");
    assert_eq!(again, message);
});
