//! `hash-password` / `verify-password`.

use std::{io::BufRead, path::Path};

use blackkeep_crypto::{PasswordHash, hash_password, verify_password};
use blackkeep_rendezvous::SystemEnv;
use tracing::info;

use crate::error::CliError;

/// Hash the first line of stdin and log the JSON record.
pub fn hash_from_stdin() -> Result<(), CliError> {
    let password = read_password()?;
    let record = hash_password(&password, &SystemEnv::new());

    info!(iterations = record.iterations, record = %serde_json::to_string(&record)?, "password hashed");
    Ok(())
}

/// Verify the first line of stdin against a JSON record file.
pub fn verify_from_stdin(record_path: &Path) -> Result<(), CliError> {
    let raw = std::fs::read_to_string(record_path)?;
    let record: PasswordHash = serde_json::from_str(&raw)?;
    let password = read_password()?;

    if verify_password(&password, &record) {
        info!("password matches");
        Ok(())
    } else {
        Err(CliError::PasswordMismatch)
    }
}

fn read_password() -> Result<String, CliError> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
