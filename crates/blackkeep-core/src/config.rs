//! Typed rendezvous configuration.
//!
//! Every tunable of the room and relay protocol lives here as a named,
//! versioned field. Callers construct it explicitly (or deserialize it) and
//! hand it to the components that need it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current configuration schema version.
pub const CONFIG_VERSION: u32 = 1;

/// Smallest accepted padding block.
pub const MIN_PADDING_BLOCK: usize = 512;

/// Bounds on the room lifetime.
pub const ROOM_TTL_RANGE: (Duration, Duration) =
    (Duration::from_secs(60), Duration::from_secs(24 * 60 * 60));

/// Bounds on the signal lifetime.
pub const SIGNAL_TTL_RANGE: (Duration, Duration) =
    (Duration::from_secs(5), Duration::from_secs(120));

/// Configuration validation failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A field is outside its allowed range
    #[error("invalid config field `{field}`: {reason}")]
    Invalid {
        /// Name of the offending field
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}

/// Protocol configuration shared by room lifecycle, relay and codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RendezvousConfig {
    /// Schema version, bumped when field meaning changes
    pub version: u32,
    /// Top-level store namespace all paths live under
    pub namespace: String,
    /// How long a room stays joinable after creation
    #[serde(with = "duration_secs")]
    pub room_ttl: Duration,
    /// Delay past `room_ttl` before the local expiry sweep runs
    #[serde(with = "duration_secs")]
    pub expiry_grace: Duration,
    /// Failed join attempts after which a room locks
    pub lockout_threshold: u32,
    /// How long an undelivered signal survives
    #[serde(with = "duration_secs")]
    pub signal_ttl: Duration,
    /// Message padding granularity in bytes
    pub padding_block: usize,
    /// Retry budget for store transactions
    pub max_transaction_retries: u32,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            namespace: "blackkeep".to_string(),
            room_ttl: Duration::from_secs(120),
            expiry_grace: Duration::from_secs(5),
            lockout_threshold: 5,
            signal_ttl: Duration::from_secs(30),
            padding_block: MIN_PADDING_BLOCK,
            max_transaction_retries: 25,
        }
    }
}

impl RendezvousConfig {
    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != CONFIG_VERSION {
            return Err(ConfigError::Invalid {
                field: "version",
                reason: format!("unsupported version {}, expected {CONFIG_VERSION}", self.version),
            });
        }

        if self.namespace.is_empty()
            || !self.namespace.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(ConfigError::Invalid {
                field: "namespace",
                reason: "must be non-empty ASCII alphanumerics, '-' or '_'".to_string(),
            });
        }

        check_range("room_ttl", self.room_ttl, ROOM_TTL_RANGE)?;
        check_range("signal_ttl", self.signal_ttl, SIGNAL_TTL_RANGE)?;

        if self.lockout_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "lockout_threshold",
                reason: "must be at least 1".to_string(),
            });
        }

        if self.padding_block < MIN_PADDING_BLOCK {
            return Err(ConfigError::Invalid {
                field: "padding_block",
                reason: format!("must be at least {MIN_PADDING_BLOCK}, got {}", self.padding_block),
            });
        }

        if self.max_transaction_retries == 0 {
            return Err(ConfigError::Invalid {
                field: "max_transaction_retries",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    /// Room lifetime in milliseconds, for `expiresAt` arithmetic.
    pub fn room_ttl_millis(&self) -> u64 {
        self.room_ttl.as_millis() as u64
    }

    /// Signal lifetime in milliseconds.
    pub fn signal_ttl_millis(&self) -> u64 {
        self.signal_ttl.as_millis() as u64
    }
}

fn check_range(
    field: &'static str,
    value: Duration,
    (low, high): (Duration, Duration),
) -> Result<(), ConfigError> {
    if value < low || value > high {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("{value:?} is outside {low:?}..={high:?}"),
        });
    }
    Ok(())
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(RendezvousConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_small_padding_block() {
        let config = RendezvousConfig { padding_block: 256, ..Default::default() };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "padding_block", .. })
        ));
    }

    #[test]
    fn rejects_room_ttl_out_of_range() {
        let short = RendezvousConfig { room_ttl: Duration::from_secs(10), ..Default::default() };
        assert!(short.validate().is_err());

        let long =
            RendezvousConfig { room_ttl: Duration::from_secs(48 * 3600), ..Default::default() };
        assert!(long.validate().is_err());
    }

    #[test]
    fn rejects_zero_threshold() {
        let config = RendezvousConfig { lockout_threshold: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_namespace_with_separator() {
        let config = RendezvousConfig { namespace: "a/b".to_string(), ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: RendezvousConfig =
            serde_json::from_str(r#"{ "room_ttl": 600, "signal_ttl": 45 }"#).unwrap();

        assert_eq!(config.room_ttl, Duration::from_secs(600));
        assert_eq!(config.signal_ttl, Duration::from_secs(45));
        assert_eq!(config.lockout_threshold, 5);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<RendezvousConfig, _> = serde_json::from_str(r#"{ "theme": "dark" }"#);
        assert!(result.is_err());
    }
}
