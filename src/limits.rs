//! # Exchange Limits
//!
//! Budget a single multi-var exchange must respect. Reads and writes carry
//! different per-message and per-item overheads, so each direction has its own
//! limits.
//!
//! ## Defaults
//!
//! | Direction | Max items | PDU | Per message | Per item |
//! |-----------|-----------|-----|-------------|----------|
//! | Read | 19 | 240 | 13 | 5 |
//! | Write | 10 | 240 | 24 | 16 |

use serde::{Deserialize, Serialize};

use crate::constants::{
    MAX_READ_ITEMS, MAX_WRITE_ITEMS, OVERHEAD_READ_MESSAGE, OVERHEAD_READ_VARIABLE,
    OVERHEAD_WRITE_MESSAGE, OVERHEAD_WRITE_VARIABLE, PDU_SIZE,
};

/// Budget of one exchange direction.
///
/// # Example
///
/// ```rust
/// use voltage_s7::ExchangeLimits;
///
/// let limits = ExchangeLimits::read().with_pdu_size(480);
/// assert_eq!(limits.payload_budget(), 480 - 13);
/// assert!(limits.fits(0, 0, 100));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeLimits {
    /// Maximum items in one exchange
    pub max_items: usize,
    /// PDU size the exchange must fit in
    pub pdu_size: usize,
    /// Fixed bytes per message
    pub message_overhead: usize,
    /// Extra bytes per item on top of its data
    pub item_overhead: usize,
}

impl ExchangeLimits {
    /// Read var defaults
    pub fn read() -> Self {
        Self {
            max_items: MAX_READ_ITEMS,
            pdu_size: PDU_SIZE,
            message_overhead: OVERHEAD_READ_MESSAGE,
            item_overhead: OVERHEAD_READ_VARIABLE,
        }
    }

    /// Write var defaults
    pub fn write() -> Self {
        Self {
            max_items: MAX_WRITE_ITEMS,
            pdu_size: PDU_SIZE,
            message_overhead: OVERHEAD_WRITE_MESSAGE,
            item_overhead: OVERHEAD_WRITE_VARIABLE,
        }
    }

    pub fn with_max_items(mut self, count: usize) -> Self {
        self.max_items = count;
        self
    }

    pub fn with_pdu_size(mut self, pdu_size: usize) -> Self {
        self.pdu_size = pdu_size;
        self
    }

    /// Cap the PDU size at what the device granted
    pub fn capped_to(self, granted_pdu: usize) -> Self {
        Self {
            pdu_size: self.pdu_size.min(granted_pdu),
            ..self
        }
    }

    /// Bytes available to items in one message
    pub fn payload_budget(&self) -> usize {
        self.pdu_size.saturating_sub(self.message_overhead)
    }

    /// Whether an item of `item_size` bytes can join a batch holding `count`
    /// items that already use `used` bytes
    pub fn fits(&self, used: usize, count: usize, item_size: usize) -> bool {
        count < self.max_items && used + item_size + self.item_overhead < self.payload_budget()
    }
}

/// Read and write limits of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchLimits {
    pub read: ExchangeLimits,
    pub write: ExchangeLimits,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            read: ExchangeLimits::read(),
            write: ExchangeLimits::write(),
        }
    }
}

impl BatchLimits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits for devices that choke on large multi-var jobs
    ///
    /// - 8 read items, 4 write items
    /// - Same PDU and overheads as the defaults
    pub fn conservative() -> Self {
        Self {
            read: ExchangeLimits::read().with_max_items(8),
            write: ExchangeLimits::write().with_max_items(4),
        }
    }

    pub fn capped_to(self, granted_pdu: usize) -> Self {
        Self {
            read: self.read.capped_to(granted_pdu),
            write: self.write.capped_to(granted_pdu),
        }
    }
}
