//! Stored record shapes and store paths.
//!
//! ```text
//! {ns}/rooms/{code}                      RoomRecord
//! {ns}/rooms/{code}/members/{peer}       MemberRecord
//! {ns}/rooms/{code}/signals/{push id}    SignalRecord
//! ```
//!
//! Room and signal records carry random decoy fields so stored entries have
//! no fixed size or shape.

use blackkeep_core::{Environment, PeerId, RoomCode};
use blackkeep_store::StorePath;
use serde::{Deserialize, Serialize};

use crate::error::RendezvousError;

const DECOY_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Decoy string length is `16..48`.
const DECOY_MIN_LEN: usize = 16;
const DECOY_SPREAD: usize = 32;

/// Signal padding length is `32..96` bytes.
const PADDING_MIN_LEN: usize = 32;
const PADDING_SPREAD: usize = 64;

/// Room metadata as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    /// Server time at creation (ms)
    pub created_at: u64,
    /// `created_at + room_ttl` (ms)
    pub expires_at: u64,
    /// Failed join attempts so far
    pub failed_attempts: u32,
    /// Set once `failed_attempts` reaches the threshold; never cleared
    pub locked: bool,
    /// Decoy
    pub decoy1: String,
    /// Decoy
    pub decoy2: String,
    /// Decoy
    pub hash: String,
}

impl RoomRecord {
    /// Fresh unlocked record.
    pub fn new<E: Environment>(created_at: u64, ttl_millis: u64, env: &E) -> Self {
        Self {
            created_at,
            expires_at: created_at.saturating_add(ttl_millis),
            failed_attempts: 0,
            locked: false,
            decoy1: decoy_field(env),
            decoy2: decoy_field(env),
            hash: decoy_field(env),
        }
    }

    /// True strictly after `expires_at`.
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }
}

/// One member entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRecord {
    /// Exported public key
    pub public_key: String,
    /// Optional human-readable name
    #[serde(default)]
    pub display_name: String,
    /// Server time the member joined (ms)
    pub joined_at: u64,
}

/// One relayed signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalRecord {
    /// Sender
    pub from: PeerId,
    /// Intended recipient
    pub to: PeerId,
    /// Signal-key ciphertext (base64)
    pub payload: String,
    /// Server time at send (ms)
    pub sent_at: u64,
    /// `sent_at + signal_ttl` (ms)
    pub expires_at: u64,
    /// Random filler
    pub random_padding: Vec<u8>,
    /// Decoy
    pub decoy1: String,
}

impl SignalRecord {
    /// True strictly after `expires_at`.
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }
}

/// Room metadata returned to callers (decoys stripped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMeta {
    /// Room code
    pub code: RoomCode,
    /// Server time at creation (ms)
    pub created_at: u64,
    /// Expiry time (ms)
    pub expires_at: u64,
    /// Failed join attempts so far
    pub failed_attempts: u32,
    /// Lockout flag
    pub locked: bool,
}

impl RoomMeta {
    pub(crate) fn from_record(code: RoomCode, record: &RoomRecord) -> Self {
        Self {
            code,
            created_at: record.created_at,
            expires_at: record.expires_at,
            failed_attempts: record.failed_attempts,
            locked: record.locked,
        }
    }
}

/// Another member of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Member id
    pub peer_id: PeerId,
    /// Exported public key
    pub public_key: String,
    /// Display name, empty if unset
    pub display_name: String,
    /// Server time the member joined (ms)
    pub joined_at: u64,
}

/// Store paths under one namespace.
#[derive(Debug, Clone)]
pub(crate) struct RoomPaths {
    rooms: StorePath,
}

impl RoomPaths {
    pub(crate) fn new(namespace: &str) -> Result<Self, RendezvousError> {
        let rooms = StorePath::new(format!("{namespace}/rooms"))
            .map_err(|e| RendezvousError::InvalidInput(e.to_string()))?;
        Ok(Self { rooms })
    }

    pub(crate) fn room(&self, code: &RoomCode) -> StorePath {
        self.rooms.child(code.as_str())
    }

    pub(crate) fn members(&self, code: &RoomCode) -> StorePath {
        self.room(code).child("members")
    }

    pub(crate) fn member(&self, code: &RoomCode, peer: &PeerId) -> StorePath {
        self.members(code).child(peer.as_str())
    }

    pub(crate) fn signals(&self, code: &RoomCode) -> StorePath {
        self.room(code).child("signals")
    }
}

/// Random alphanumeric string of 16 to 47 characters.
pub(crate) fn decoy_field<E: Environment>(env: &E) -> String {
    let len = DECOY_MIN_LEN + env.random_index(DECOY_SPREAD);
    (0..len).map(|_| char::from(DECOY_ALPHABET[env.random_index(DECOY_ALPHABET.len())])).collect()
}

/// Random bytes, 32 to 95 of them.
pub(crate) fn random_padding<E: Environment>(env: &E) -> Vec<u8> {
    let mut padding = vec![0u8; PADDING_MIN_LEN + env.random_index(PADDING_SPREAD)];
    env.random_bytes(&mut padding);
    padding
}

#[cfg(test)]
mod tests {
    use blackkeep_harness::SimEnv;

    use super::*;

    #[test]
    fn decoys_vary_in_length_and_stay_in_range() {
        let env = SimEnv::with_seed(5);
        let lengths: Vec<usize> = (0..64).map(|_| decoy_field(&env).len()).collect();

        assert!(lengths.iter().all(|len| (16..48).contains(len)));
        assert!(lengths.iter().any(|&len| len != lengths[0]));
    }

    #[test]
    fn padding_in_range() {
        let env = SimEnv::with_seed(5);
        for _ in 0..64 {
            assert!((32..96).contains(&random_padding(&env).len()));
        }
    }

    #[test]
    fn expiry_is_strict() {
        let env = SimEnv::with_seed(5);
        let record = RoomRecord::new(1_000, 120_000, &env);

        assert!(!record.is_expired(121_000));
        assert!(record.is_expired(121_001));
    }

    #[test]
    fn paths_follow_layout() {
        let paths = RoomPaths::new("blackkeep").unwrap();
        let code = RoomCode::parse("K7H3MQXZ").unwrap();
        let peer = PeerId::parse("abcdefgh12345678").unwrap();

        assert_eq!(paths.room(&code).as_str(), "blackkeep/rooms/K7H3MQXZ");
        assert_eq!(
            paths.member(&code, &peer).as_str(),
            "blackkeep/rooms/K7H3MQXZ/members/abcdefgh12345678"
        );
        assert_eq!(paths.signals(&code).as_str(), "blackkeep/rooms/K7H3MQXZ/signals");
    }

    #[test]
    fn record_survives_cbor() {
        let env = SimEnv::with_seed(6);
        let record = RoomRecord::new(5, 10, &env);
        let bytes = blackkeep_store::cbor::encode(&record).unwrap();
        assert_eq!(blackkeep_store::cbor::decode::<RoomRecord>(&bytes).unwrap(), record);
    }
}
