//! Fuzz target for room code and peer id parsing
//!
//! # Invariants
//!
//! - NEVER panic on arbitrary input
//! - Anything accepted is already normalized: parsing it again is identity
//! - Accepted room codes contain only alphabet symbols

#![no_main]

use blackkeep_core::{PeerId, ROOM_CODE_ALPHABET, RoomCode};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: &str| {
    if let Ok(code) = RoomCode::parse(input) {
        assert!(code.as_str().bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b)));
        assert_eq!(RoomCode::parse(code.as_str()).ok(), Some(code));
    }

    if let Ok(peer) = PeerId::parse(input) {
        assert_eq!(peer.as_str(), input);
    }
});
