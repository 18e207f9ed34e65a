//! CLI error types.

use std::path::PathBuf;

use blackkeep_core::ConfigError;
use blackkeep_rendezvous::RendezvousError;
use thiserror::Error;

/// Errors a subcommand can end with.
#[derive(Error, Debug)]
pub enum CliError {
    /// Config file missing, unreadable or out of range
    #[error("config {path}: {reason}")]
    Config {
        /// File that was read
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// Configuration built from flags is invalid
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    /// Protocol operation failed
    #[error(transparent)]
    Rendezvous(#[from] RendezvousError),

    /// Peers disagree about something they should share
    #[error("peers disagree: {0}")]
    Mismatch(String),

    /// Password did not match the record
    #[error("password does not match")]
    PasswordMismatch,

    /// Reading stdin or a file failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Password record is not valid JSON
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
