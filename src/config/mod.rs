//! Configuration module for the fleet controller.
//!
//! This module handles loading and parsing configuration from environment
//! variables using the figment crate. It supports flexible duration parsing
//! that accepts both numeric values (interpreted as seconds) and duration
//! strings with units.

use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Main application configuration containing all sub-configurations
#[derive(Deserialize)]
pub struct Config {
    /// Log level for the application
    ///
    /// This value is used to set the log level for this application's target specifically.
    /// e.g. "debug" would be similar to "warn,fleetd=debug,..."
    ///
    /// Valid values are: "trace", "debug", "info", "warn", "error"
    /// Defaults to "info" if not specified
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Port for the web server (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Postgres connection URL; primary session/credential backing.
    pub database_url: String,
    /// Optional MongoDB connection URL; secondary session backing (spec §6).
    /// When unset the session store runs single-backed.
    pub mongo_url: Option<String>,
    /// Graceful shutdown timeout duration
    ///
    /// Accepts both numeric values (seconds) and duration strings
    /// Defaults to 8 seconds if not specified
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,
    /// Maximum number of simultaneously connected sessions this process
    /// will maintain (spec §4.6 fleet capacity).
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Base64-encoded 32-byte key used to encrypt credential blobs at rest.
    pub session_encryption_key: String,
    /// Secret used to sign bearer tokens issued at `/api/login`.
    pub jwt_secret: String,
    /// Bearer token lifetime.
    #[serde(default = "default_jwt_expiry", deserialize_with = "deserialize_duration")]
    pub jwt_expiry: Duration,
    /// Rate limiting configuration for the pairing/auth surface.
    #[serde(default = "default_rate_limiting")]
    pub rate_limiting: RateLimitingConfig,
}

/// Default log level of "info"
fn default_log_level() -> String {
    "info".to_string()
}

/// Default port of 8080
fn default_port() -> u16 {
    8080
}

/// Default shutdown timeout of 8 seconds
fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

/// Default fleet capacity: conservative enough to run on a single small box.
fn default_max_sessions() -> usize {
    500
}

/// Default bearer token lifetime of 24 hours
fn default_jwt_expiry() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

/// Rate limiting configuration for the web-tier auth/pairing surface
#[derive(Deserialize, Clone, Debug)]
pub struct RateLimitingConfig {
    /// Requests per minute for pairing-code issuance (very conservative —
    /// upstream throttles this hard).
    #[serde(default = "default_pairing_rpm")]
    pub pairing_rpm: u32,
    /// Requests per minute for login attempts.
    #[serde(default = "default_login_rpm")]
    pub login_rpm: u32,
    /// Requests per minute for registration.
    #[serde(default = "default_register_rpm")]
    pub register_rpm: u32,
    /// Burst allowance (extra requests allowed in short bursts)
    #[serde(default = "default_burst_allowance")]
    pub burst_allowance: u32,
}

/// Default rate limiting configuration
fn default_rate_limiting() -> RateLimitingConfig {
    RateLimitingConfig {
        pairing_rpm: default_pairing_rpm(),
        login_rpm: default_login_rpm(),
        register_rpm: default_register_rpm(),
        burst_allowance: default_burst_allowance(),
    }
}

/// Default pairing requests per minute (6 = 1 every 10 seconds)
fn default_pairing_rpm() -> u32 {
    6
}

/// Default login attempts per minute (10 = 1 every 6 seconds)
fn default_login_rpm() -> u32 {
    10
}

/// Default registration attempts per minute (5 = 1 every 12 seconds)
fn default_register_rpm() -> u32 {
    5
}

/// Default burst allowance (3 extra requests)
fn default_burst_allowance() -> u32 {
    3
}

/// Duration parser configured to handle various time units with seconds as default
///
/// Supports:
/// - Seconds (s) - default unit
/// - Milliseconds (ms)
/// - Minutes (m)
/// - Hours (h)
///
/// Does not support fractions, exponents, or infinity values
/// Allows for whitespace between the number and the time unit
/// Allows for multiple time units to be specified (summed together, e.g "10s 2m" = 120 + 10 = 130 seconds)
const DURATION_PARSER: DurationParser<'static> = DurationParser::builder()
    .time_units(&[TimeUnit::Second, TimeUnit::MilliSecond, TimeUnit::Minute, TimeUnit::Hour])
    .parse_multiple(None)
    .allow_time_unit_delimiter()
    .disable_infinity()
    .disable_fraction()
    .disable_exponent()
    .default_unit(TimeUnit::Second)
    .build();

/// Custom deserializer for duration fields that accepts both numeric and string values
///
/// This deserializer handles the flexible duration parsing by accepting:
/// - Unsigned integers (interpreted as seconds)
/// - Signed integers (interpreted as seconds, must be non-negative)
/// - Strings (parsed using the fundu duration parser)
///
/// # Examples
///
/// - `1` -> 1 second
/// - `"30s"` -> 30 seconds
/// - `"2 m"` -> 2 minutes
/// - `"1500ms"` -> 15 seconds
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Visitor;

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a duration string or number")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            DURATION_PARSER.parse(value)
                .map_err(|e| {
                    serde::de::Error::custom(format!(
                        "Invalid duration format '{}': {}. Examples: '5' (5 seconds), '3500ms', '30s', '2m', '1.5h'",
                        value, e
                    ))
                })?
                .try_into()
                .map_err(|e| serde::de::Error::custom(format!("Duration conversion error: {}", e)))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if value < 0 {
                return Err(serde::de::Error::custom("Duration cannot be negative"));
            }
            Ok(Duration::from_secs(value as u64))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}
