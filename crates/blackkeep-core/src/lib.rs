//! Blackkeep core types.
//!
//! Shared foundation for the rendezvous protocol crates:
//!
//! - [`Environment`]: time, sleep and secure randomness behind a trait, so
//!   protocol logic runs identically against the system clock and a seeded
//!   simulation
//! - [`RendezvousConfig`]: typed, versioned protocol configuration
//! - [`RoomCode`] / [`PeerId`]: validated identifiers that double as store
//!   path segments

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod env;
pub mod ids;

pub use config::{CONFIG_VERSION, ConfigError, MIN_PADDING_BLOCK, RendezvousConfig};
pub use env::Environment;
pub use ids::{
    IdError, PEER_ID_ALPHABET, PEER_ID_LENGTH, PeerId, ROOM_CODE_ALPHABET, ROOM_CODE_LENGTH,
    RoomCode,
};
