//! # Voltage S7 - Polling Engine for Siemens S7 Controllers
//!
//! Polls and writes process variables on S7 PLCs over ISO-on-TCP, packing
//! many variables into as few read/write var jobs as the PDU allows.
//!
//! ## Features
//!
//! - **One worker per device**: a tokio task per connection, started on the
//!   first registration and stopped with the last unregistration
//! - **PDU-budgeted batching**: greedy packing under item-count and byte
//!   budgets, oversized items fragmented by the transport
//! - **Write-then-read cycles**: written variables are read back in the same
//!   cycle
//! - **Link recovery**: failure threshold, fixed reconnect backoff and a
//!   per-device `connectionError` health entry
//! - **Smoothing**: optional change detection before results are forwarded
//!
//! ## Address Syntax
//!
//! | Text | Area | Width | Count |
//! |------|------|-------|-------|
//! | `VW1984` | DB1 | word | 1 |
//! | `VB2978.20` | DB1 | byte | 20 |
//! | `V1604.2` | DB1 | bit | 1 |
//! | `MD8` | flags | real | 1 |
//! | `IB0`, `QB0` | inputs, outputs | byte | 1 |
//! | `TW3`, `CW1` | timers, counters | 2 bytes | 1 |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voltage_s7::{DriverConfig, ResultQueue, S7Result, S7Service};
//!
//! #[tokio::main]
//! async fn main() -> S7Result<()> {
//!     let config = DriverConfig::default().with_tsaps(0x0100, 0x0200);
//!     let queue = Arc::new(ResultQueue::new());
//!     let service = S7Service::tcp(config, queue.clone());
//!     service.start();
//!
//!     // device$address$period
//!     service.register_variable("192.168.0.10$VW0$2")?;
//!     service.register_variable("192.168.0.10$VB100.16$5")?;
//!
//!     queue.wait().await;
//!     for entry in queue.drain() {
//!         println!("{} -> {:02X?}", entry.name, &entry.data[..]);
//!     }
//!
//!     service.stop().await;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Error types and result alias
pub mod error;

/// Protocol constants and driver defaults
pub mod constants;

/// Textual variable addresses
pub mod address;

/// Tagged wire values
pub mod value;

/// Stack-allocated S7 PDU and request builders
pub mod pdu;

/// Request items and their status
pub mod item;

/// TPKT/COTP framing and response parsing
pub mod codec;

/// Device transports (TCP and simulated)
pub mod transport;

// ============================================================================
// Engine modules
// ============================================================================

/// Per-variable runtime record
pub mod variable;

/// Per-device variable registry
pub mod session;

/// Exchange budgets
pub mod limits;

/// Link lifecycle and health
pub mod connection;

/// Batch planning and dispatch
pub mod scheduler;

/// Result filtering and forwarding
pub mod publisher;

/// Poll worker
pub mod poll;

/// Device registry and entry point
pub mod service;

/// Driver configuration
pub mod config;

/// Logging setup
pub mod logging;

// ============================================================================
// Re-exports for convenience
// ============================================================================

pub use tokio;

// === Entry point ===
pub use service::{RegistrationKey, S7Service};

// === Error handling ===
pub use error::{S7Error, S7Result};

// === Core types ===
pub use address::{is_valid_address, Area, S7Address, WordLen};
pub use item::{ItemStatus, WireItem};
pub use value::{S7Value, WireType};

// === Engine ===
pub use connection::{ConnectionManager, DeviceRole};
pub use limits::{BatchLimits, ExchangeLimits};
pub use poll::{CycleReport, PollLoop};
pub use publisher::{ResultEntry, ResultPublisher, ResultQueue, ResultSink};
pub use scheduler::{plan_batches, Batch, BatchScheduler, BatchSummary, Direction};
pub use session::DeviceSession;

// === Transport ===
pub use codec::S7Codec;
pub use pdu::{PduBuilder, S7Pdu};
pub use transport::{
    Endpoint, MemoryTransport, S7Transport, TcpTransport, TransportCall, TransportStats,
};

// === Configuration & logging ===
pub use config::DriverConfig;
pub use logging::{init_logging, LogHandle, LogLevel};

// === Protocol limits ===
pub use constants::{ISO_TCP_PORT, MAX_PDU_SIZE, PDU_SIZE};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Voltage S7 v{} - S7 polling engine by Evan Liu", VERSION)
}
