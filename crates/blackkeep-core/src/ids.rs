//! Validated identifiers: room codes and peer ids.
//!
//! Both are short strings typed by (or shown to) humans and used verbatim as
//! store path segments, so they are validated at every boundary. Construction
//! only goes through [`RoomCode::parse`] / [`PeerId::parse`] or the random
//! generators; deserialization re-validates.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::env::Environment;

/// Number of characters in a room code.
pub const ROOM_CODE_LENGTH: usize = 8;

/// Symbols a room code is drawn from.
///
/// Uppercase letters and digits with the visually ambiguous `0 O I 1 L`
/// removed.
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Number of characters in a peer id.
pub const PEER_ID_LENGTH: usize = 16;

/// Symbols a peer id is drawn from.
pub const PEER_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Identifier validation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    /// Room code has the wrong length or contains a symbol outside the
    /// alphabet
    #[error("invalid room code: {reason}")]
    InvalidRoomCode {
        /// What was wrong with the input
        reason: String,
    },

    /// Peer id has the wrong length or contains a symbol outside the alphabet
    #[error("invalid peer id: {reason}")]
    InvalidPeerId {
        /// What was wrong with the input
        reason: String,
    },
}

/// An 8-character rendezvous code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    /// Draw a fresh code from the secure RNG.
    pub fn generate<E: Environment>(env: &E) -> Self {
        let code = (0..ROOM_CODE_LENGTH)
            .map(|_| char::from(ROOM_CODE_ALPHABET[env.random_index(ROOM_CODE_ALPHABET.len())]))
            .collect();
        Self(code)
    }

    /// Normalize (trim, uppercase) and validate user input.
    pub fn parse(input: &str) -> Result<Self, IdError> {
        let normalized = input.trim().to_ascii_uppercase();

        if normalized.len() != ROOM_CODE_LENGTH {
            return Err(IdError::InvalidRoomCode {
                reason: format!(
                    "expected {ROOM_CODE_LENGTH} characters, got {}",
                    normalized.chars().count()
                ),
            });
        }

        if let Some(bad) = normalized.bytes().find(|b| !ROOM_CODE_ALPHABET.contains(b)) {
            return Err(IdError::InvalidRoomCode {
                reason: format!("symbol {:?} is not allowed", char::from(bad)),
            });
        }

        Ok(Self(normalized))
    }

    /// The code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoomCode {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

/// A 16-character peer identifier, unique per peer per session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerId(String);

impl PeerId {
    /// Draw a fresh peer id from the secure RNG.
    pub fn generate<E: Environment>(env: &E) -> Self {
        let id = (0..PEER_ID_LENGTH)
            .map(|_| char::from(PEER_ID_ALPHABET[env.random_index(PEER_ID_ALPHABET.len())]))
            .collect();
        Self(id)
    }

    /// Validate a peer id. No normalization: ids are machine-generated.
    pub fn parse(input: &str) -> Result<Self, IdError> {
        if input.len() != PEER_ID_LENGTH {
            return Err(IdError::InvalidPeerId {
                reason: format!("expected {PEER_ID_LENGTH} characters, got {}", input.len()),
            });
        }

        if let Some(bad) = input.bytes().find(|b| !PEER_ID_ALPHABET.contains(b)) {
            return Err(IdError::InvalidPeerId {
                reason: format!("symbol {:?} is not allowed", char::from(bad)),
            });
        }

        Ok(Self(input.to_string()))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PeerId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PeerId> for String {
    fn from(id: PeerId) -> Self {
        id.0
    }
}
