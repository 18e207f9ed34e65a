//! Deterministic simulation harness for Blackkeep protocol testing.
//!
//! Provides [`SimEnv`], an [`Environment`](blackkeep_core::Environment) backed
//! by tokio's (pausable) clock and a seeded ChaCha20 RNG. Tests that run under
//! `#[tokio::test(start_paused = true)]` get reproducible randomness and can
//! fast-forward through room and signal lifetimes without waiting.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod sim_env;

pub use sim_env::{SIM_EPOCH_MILLIS, SimEnv};
