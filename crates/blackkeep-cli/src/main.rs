//! Blackkeep command line.
//!
//! # Usage
//!
//! ```bash
//! # Two peers meet, handshake, and exchange ratcheted messages in-process
//! blackkeep demo --messages 10 --ratchet-every 3
//!
//! # Same, with settings from a JSON file
//! blackkeep demo --config rendezvous.json
//!
//! # Hash a password read from stdin; the JSON record is logged
//! echo hunter2 | blackkeep hash-password
//!
//! # Check a password against a record saved to a file
//! echo hunter2 | blackkeep verify-password --record record.json
//! ```

mod demo;
mod error;
mod password;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Blackkeep rendezvous tools
#[derive(Parser, Debug)]
#[command(name = "blackkeep")]
#[command(about = "Blackkeep secure rendezvous protocol tools")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run two peers against an in-process store
    Demo(demo::DemoArgs),

    /// Hash a password read from stdin
    HashPassword,

    /// Check a password read from stdin against a stored record
    VerifyPassword {
        /// JSON record printed by `hash-password`
        #[arg(long)]
        record: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    match args.command {
        Command::Demo(demo_args) => demo::run(demo_args).await?,
        Command::HashPassword => password::hash_from_stdin()?,
        Command::VerifyPassword { record } => password::verify_from_stdin(&record)?,
    }

    Ok(())
}
