//! Logging setup with a runtime-adjustable level
//!
//! [`init_logging`] installs a `tracing-subscriber` fmt layer behind a
//! reloadable [`EnvFilter`]. The returned [`LogHandle`] changes the level
//! while workers keep running; the service routes the `_DEBUGLVL`
//! configuration address to it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

use crate::error::{S7Error, S7Result};

/// Log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Map a host verbosity number: 0 warn, 1 info, 2 debug, 3 and up trace
    pub fn from_verbosity(level: u16) -> Self {
        match level {
            0 => Self::Warn,
            1 => Self::Info,
            2 => Self::Debug,
            _ => Self::Trace,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::new(self.as_str())
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = S7Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => other
                .parse::<u16>()
                .map(Self::from_verbosity)
                .map_err(|_| S7Error::configuration(format!("Unknown log level '{}'", s))),
        }
    }
}

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Handle for changing the log level at runtime
#[derive(Clone)]
pub struct LogHandle {
    filter: Option<FilterHandle>,
    current: Arc<Mutex<LogLevel>>,
}

impl fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogHandle")
            .field("level", &*self.current.lock())
            .field("attached", &self.filter.is_some())
            .finish()
    }
}

impl LogHandle {
    /// Handle that only records the level, for embedders that own the subscriber
    pub fn detached(level: LogLevel) -> Self {
        Self {
            filter: None,
            current: Arc::new(Mutex::new(level)),
        }
    }

    pub fn level(&self) -> LogLevel {
        *self.current.lock()
    }

    pub fn set_level(&self, level: LogLevel) -> S7Result<()> {
        if let Some(filter) = &self.filter {
            filter
                .reload(level.filter())
                .map_err(|e| {
                    S7Error::configuration(format!("Failed to reload log filter: {}", e))
                })?;
        }
        *self.current.lock() = level;
        tracing::info!("Log level set to {}", level);
        Ok(())
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init_logging(level: LogLevel) -> S7Result<LogHandle> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| level.filter());
    let (filter_layer, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .map_err(|e| S7Error::configuration(format!("Logging already initialized: {}", e)))?;

    Ok(LogHandle {
        filter: Some(handle),
        current: Arc::new(Mutex::new(level)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_verbosity() {
        assert_eq!(LogLevel::from_verbosity(0), LogLevel::Warn);
        assert_eq!(LogLevel::from_verbosity(1), LogLevel::Info);
        assert_eq!(LogLevel::from_verbosity(2), LogLevel::Debug);
        assert_eq!(LogLevel::from_verbosity(9), LogLevel::Trace);
    }

    #[test]
    fn test_parse() {
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("2".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_detached_handle_records_level() {
        let handle = LogHandle::detached(LogLevel::Info);
        handle.set_level(LogLevel::Trace).unwrap();
        assert_eq!(handle.level(), LogLevel::Trace);
        assert_eq!(handle.clone().level(), LogLevel::Trace);
    }
}
