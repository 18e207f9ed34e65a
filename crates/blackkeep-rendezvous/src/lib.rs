//! Blackkeep rendezvous protocol.
//!
//! Two peers meet through a short room code on a shared store, exchange
//! public keys over an encrypted signal relay, and end up with a
//! [`SecureSession`] whose keys the store never saw.
//!
//! # Flow
//!
//! ```text
//! RoomLifecycle::create / join
//!        │
//!        ▼
//! SignalChannel (room-derived key) ──► establish_session ──► SecureSession
//!                                                             │
//!                                              encrypt / decrypt / rekey
//! ```
//!
//! Every component takes its store connection and [`Environment`] at
//! construction; there is no global state. Background work (expiry timers,
//! relay listeners) runs on tokio tasks owned by handles that cancel on drop.
//!
//! [`Environment`]: blackkeep_core::Environment

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
pub mod handshake;
mod records;
pub mod relay;
pub mod room;
mod system_env;

pub use error::RendezvousError;
pub use handshake::{SecureSession, SignalChannel, SignalMessage, establish_session};
pub use records::{MemberRecord, PeerInfo, RoomMeta, RoomRecord, SignalRecord};
pub use relay::{ReceivedSignal, SignalInbox, SignalListener, SignalRelay};
pub use room::{JoinOutcome, LockoutStatus, MAX_CODE_ATTEMPTS, RoomEvent, RoomLifecycle, RoomWatch};
pub use system_env::SystemEnv;
