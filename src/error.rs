//! Error types for the S7 polling engine
//!
//! Errors fall into three groups:
//! - **Registration errors** ([`S7Error::InvalidAddress`], [`S7Error::UnknownVariable`],
//!   [`S7Error::UnknownDevice`]) are returned synchronously to the caller.
//! - **Link errors** ([`S7Error::Connection`], [`S7Error::Timeout`], [`S7Error::Io`])
//!   are absorbed by the poll worker, logged, and reflected in the health signal.
//! - **Exchange errors** ([`S7Error::Exchange`], [`S7Error::Protocol`]) mark every
//!   item of the failed batch and count toward the failure threshold.

use thiserror::Error;

/// Result alias used throughout the crate
pub type S7Result<T> = Result<T, S7Error>;

/// Error type for all S7 engine operations
#[derive(Error, Debug)]
pub enum S7Error {
    /// Address text could not be resolved to a wire item
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Transport could not be opened or was lost
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Operation did not complete in time
    #[error("Timeout during {operation} after {timeout_ms} ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Malformed or unexpected telegram
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Device answered the job with a non-zero error class/code
    #[error("Exchange rejected: class 0x{class:02X}, code 0x{code:02X}")]
    Exchange { class: u8, code: u8 },

    /// Write or removal for a variable that is not registered
    #[error("Unknown variable '{name}' on device '{device}'")]
    UnknownVariable { device: String, name: String },

    /// No session exists for the device
    #[error("Unknown device '{device}'")]
    UnknownDevice { device: String },

    /// Payload does not match the expected wire type
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Underlying socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl S7Error {
    pub fn invalid_address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn unknown_variable(device: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UnknownVariable {
            device: device.into(),
            name: name.into(),
        }
    }

    pub fn unknown_device(device: impl Into<String>) -> Self {
        Self::UnknownDevice {
            device: device.into(),
        }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether the error means the link itself is unusable
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::Io(_)
        )
    }

    /// Numeric code recorded on every item of a failed batch
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Exchange { class, code } => u16::from_be_bytes([*class, *code]),
            Self::Connection { .. } => 0x0001,
            Self::Timeout { .. } => 0x0002,
            Self::Io(_) => 0x0003,
            Self::Protocol { .. } => 0x0004,
            Self::InvalidData { .. } => 0x0005,
            Self::InvalidAddress { .. } => 0x0006,
            Self::UnknownVariable { .. } | Self::UnknownDevice { .. } => 0x0007,
            Self::Configuration { .. } => 0x0008,
        }
    }
}
