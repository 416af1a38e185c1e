//! Driver configuration
//!
//! One immutable [`DriverConfig`] is built at startup and shared by every
//! device worker. Sources, highest priority first:
//!
//! 1. Environment variables prefixed `S7_` (`S7_MAX_IO_FAILURES=3`,
//!    nested keys split on `__`: `S7_LIMITS__READ__MAX_ITEMS=8`)
//! 2. TOML file
//! 3. Built-in defaults
//!
//! ```toml
//! local_tsap = "0x0100"
//! remote_tsap = "0x0200"
//! polling_interval_secs = 2
//! cycle_interval_secs = 1
//! max_io_failures = 1
//! smoothing = true
//! log_level = "info"
//! ```
//!
//! TSAPs may be integers or hexadecimal strings (`"0x0100"` or `"0100"`).

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_CYCLE_INTERVAL_SECS, DEFAULT_MAX_IO_FAILURES,
    DEFAULT_POLLING_INTERVAL_SECS, DEFAULT_REQUEST_TIMEOUT_MS, ISO_TCP_PORT,
};
use crate::error::{S7Error, S7Result};
use crate::limits::BatchLimits;
use crate::logging::LogLevel;
use crate::transport::Endpoint;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "S7_";

/// Immutable driver configuration.
///
/// # Example
///
/// ```rust
/// use voltage_s7::DriverConfig;
///
/// let config = DriverConfig::default()
///     .with_tsaps(0x0100, 0x0200)
///     .with_max_io_failures(3)
///     .with_smoothing(false);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.endpoint("10.0.0.1").remote_tsap, 0x0200);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    #[serde(deserialize_with = "deserialize_tsap")]
    pub local_tsap: u16,
    #[serde(deserialize_with = "deserialize_tsap")]
    pub remote_tsap: u16,
    /// ISO-on-TCP port used when a device identity carries none
    pub port: u16,
    /// Lower bound on every variable's poll period
    pub polling_interval_secs: u64,
    /// Target length of one poll cycle
    pub cycle_interval_secs: u64,
    /// Consecutive exchange failures before the link is recycled
    pub max_io_failures: u32,
    /// Forward read values only when they change
    pub smoothing: bool,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub log_level: LogLevel,
    pub limits: BatchLimits,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            local_tsap: 0,
            remote_tsap: 0,
            port: ISO_TCP_PORT,
            polling_interval_secs: DEFAULT_POLLING_INTERVAL_SECS,
            cycle_interval_secs: DEFAULT_CYCLE_INTERVAL_SECS,
            max_io_failures: DEFAULT_MAX_IO_FAILURES,
            smoothing: true,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            log_level: LogLevel::default(),
            limits: BatchLimits::default(),
        }
    }
}

impl DriverConfig {
    /// Load from a TOML file merged with `S7_` environment variables
    pub fn load(path: impl AsRef<Path>) -> S7Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(S7Error::configuration(format!(
                "Config file {} not found",
                path.display()
            )));
        }
        Self::extract(
            Figment::from(Serialized::defaults(Self::default()))
                .merge(Toml::file(path))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Defaults merged with `S7_` environment variables only
    pub fn from_env() -> S7Result<Self> {
        Self::extract(
            Figment::from(Serialized::defaults(Self::default()))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    fn extract(figment: Figment) -> S7Result<Self> {
        let config: Self = figment
            .extract()
            .map_err(|e| S7Error::configuration(format!("Failed to load configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> S7Result<()> {
        if self.max_io_failures == 0 {
            return Err(S7Error::configuration("max_io_failures must be at least 1"));
        }
        if self.cycle_interval_secs == 0 {
            return Err(S7Error::configuration("cycle_interval_secs must be at least 1"));
        }
        for (direction, limits) in [("read", &self.limits.read), ("write", &self.limits.write)] {
            if limits.max_items == 0 {
                return Err(S7Error::configuration(format!(
                    "{} limits allow no items",
                    direction
                )));
            }
            if limits.payload_budget() <= limits.item_overhead {
                return Err(S7Error::configuration(format!(
                    "{} PDU size {} leaves no room for data",
                    direction, limits.pdu_size
                )));
            }
        }
        Ok(())
    }

    pub fn with_tsaps(mut self, local: u16, remote: u16) -> Self {
        self.local_tsap = local;
        self.remote_tsap = remote;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_polling_interval_secs(mut self, secs: u64) -> Self {
        self.polling_interval_secs = secs;
        self
    }

    pub fn with_cycle_interval_secs(mut self, secs: u64) -> Self {
        self.cycle_interval_secs = secs;
        self
    }

    pub fn with_max_io_failures(mut self, count: u32) -> Self {
        self.max_io_failures = count;
        self
    }

    pub fn with_smoothing(mut self, smoothing: bool) -> Self {
        self.smoothing = smoothing;
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_limits(mut self, limits: BatchLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Connection parameters for a device identity
    pub fn endpoint(&self, device: &str) -> Endpoint {
        Endpoint::new(device, self.local_tsap, self.remote_tsap).with_port(self.port)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TsapValue {
    Number(u64),
    Text(String),
}

/// Accept a TSAP as an integer or a hexadecimal string
fn deserialize_tsap<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    let value = match TsapValue::deserialize(deserializer)? {
        TsapValue::Number(n) => n,
        TsapValue::Text(text) => parse_hex(&text).map_err(serde::de::Error::custom)?,
    };
    u16::try_from(value)
        .map_err(|_| serde::de::Error::custom(format!("TSAP {} exceeds 16 bits", value)))
}

fn parse_hex(text: &str) -> Result<u64, String> {
    let digits = text.trim();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(digits);
    u64::from_str_radix(digits, 16).map_err(|_| format!("'{}' is not a hexadecimal TSAP", text))
}
