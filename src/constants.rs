//! S7comm / ISO-on-TCP protocol constants
//!
//! Frame layout constants follow RFC 1006 (TPKT), ISO 8073 (COTP class 0) and
//! the S7comm telegram format. Batch budget constants are the limits the poll
//! engine packs requests against:
//! - Negotiated PDU: 240 bytes (smallest PDU any S7-200/300 accepts)
//! - Read multi-var: 19 items, 13 bytes per message, 5 bytes per item
//! - Write multi-var: 10 items, 24 bytes per message, 16 bytes per item

use std::time::Duration;

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Well-known ISO-on-TCP port
pub const ISO_TCP_PORT: u16 = 102;

/// TPKT header length
/// Format: Version(1) + Reserved(1) + Length(2) = 4 bytes
pub const TPKT_HEADER_LEN: usize = 4;

/// TPKT version byte
pub const TPKT_VERSION: u8 = 0x03;

/// COTP data transfer header length
/// Format: Length(1) + PDU type(1) + TPDU number / EOT(1) = 3 bytes
pub const COTP_DT_HEADER_LEN: usize = 3;

/// S7 job header length
/// Format: Protocol ID(1) + ROSCTR(1) + Reserved(2) + PDU ref(2) + Param len(2) + Data len(2)
pub const S7_HEADER_LEN: usize = 10;

/// S7 ack-data header length (job header + error class + error code)
pub const S7_ACK_HEADER_LEN: usize = 12;

/// Largest S7 PDU any device negotiates
pub const MAX_PDU_SIZE: usize = 960;

/// Length of one request item in a read/write var parameter block
pub const S7_REQUEST_ITEM_LEN: usize = 12;

/// Receive buffer size for one telegram
///
/// Calculation:
/// - TPKT header: 4 bytes
/// - Largest PDU a device may negotiate: 960 bytes
/// - COTP header + slack: 60 bytes
pub const S7_RESPONSE_BUFFER_SIZE: usize = 1024;

// ============================================================================
// Batch Budget Constants
// ============================================================================

/// PDU size requested at setup and used as the default packing budget
pub const PDU_SIZE: usize = 240;

/// Fixed bytes of a read-var response not attributable to any item
pub const OVERHEAD_READ_MESSAGE: usize = 13;

/// Per-item bytes of a read-var response on top of the item's data
pub const OVERHEAD_READ_VARIABLE: usize = 5;

/// Fixed bytes of a write-var request not attributable to any item
pub const OVERHEAD_WRITE_MESSAGE: usize = 24;

/// Per-item bytes of a write-var request on top of the item's data
pub const OVERHEAD_WRITE_VARIABLE: usize = 16;

/// Maximum items in one read-var exchange
///
/// Calculation for the request parameter block:
/// - Function + item count: 2 bytes
/// - Items: N × 12 bytes
/// - Total: 2 + N × 12 ≤ 240 - 10 (S7 header) - 2 (slack)
/// - Therefore: N ≤ 226 / 12 = 18.8 → 19 (the device-side limit is 20)
pub const MAX_READ_ITEMS: usize = 19;

/// Maximum items in one write-var exchange
///
/// Each write item carries a 12 byte parameter entry plus a 4 byte data header,
/// which is why fewer items fit than for reads.
pub const MAX_WRITE_ITEMS: usize = 10;

/// Data block number used for every `V` area address
pub const DEFAULT_DB_NUMBER: u16 = 1;

// ============================================================================
// Timing Constants
// ============================================================================

/// Fixed backoff between reconnect attempts
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Sleep between role checks while the device role is passive
pub const PASSIVE_SLEEP: Duration = Duration::from_secs(1);

/// Default minimum polling interval
pub const DEFAULT_POLLING_INTERVAL_SECS: u64 = 2;

/// Default poll cycle length
pub const DEFAULT_CYCLE_INTERVAL_SECS: u64 = 1;

/// Default consecutive exchange failures before the link is recycled
pub const DEFAULT_MAX_IO_FAILURES: u32 = 1;

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3000;

/// Default per-exchange timeout
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 2000;

// ============================================================================
// COTP / S7 Telegram Codes
// ============================================================================

/// COTP connection request
pub const COTP_CONNECT_REQUEST: u8 = 0xE0;

/// COTP connection confirm
pub const COTP_CONNECT_CONFIRM: u8 = 0xD0;

/// COTP data transfer
pub const COTP_DATA: u8 = 0xF0;

/// COTP last-data-unit flag
pub const COTP_EOT: u8 = 0x80;

/// S7 protocol identifier
pub const S7_PROTOCOL_ID: u8 = 0x32;

/// ROSCTR job request
pub const ROSCTR_JOB: u8 = 0x01;

/// ROSCTR acknowledge with data
pub const ROSCTR_ACK_DATA: u8 = 0x03;

/// Setup communication function
pub const FN_SETUP_COMM: u8 = 0xF0;

/// Read variable function
pub const FN_READ_VAR: u8 = 0x04;

/// Write variable function
pub const FN_WRITE_VAR: u8 = 0x05;

/// Variable specification marker of a request item
pub const VAR_SPEC: u8 = 0x12;

/// Length of the address specification that follows
pub const VAR_SPEC_LEN: u8 = 0x0A;

/// ANY-pointer syntax identifier
pub const SYNTAX_ID_ANY: u8 = 0x10;

// ============================================================================
// Data Transport Sizes (response / write data headers)
// ============================================================================

/// Bit access, length given in bits
pub const TS_BIT: u8 = 0x03;

/// Byte/word/dword access, length given in bits
pub const TS_BYTE: u8 = 0x04;

/// Integer access, length given in bits
pub const TS_INT: u8 = 0x05;

/// Real access, length given in bytes
pub const TS_REAL: u8 = 0x07;

/// Octet string, length given in bytes
pub const TS_OCTET: u8 = 0x09;

// ============================================================================
// Item Return Codes
// ============================================================================

/// Item processed successfully
pub const RC_SUCCESS: u8 = 0xFF;

/// Hardware fault
pub const RC_HARDWARE_FAULT: u8 = 0x01;

/// Access to object not allowed
pub const RC_ACCESS_DENIED: u8 = 0x03;

/// Address out of range
pub const RC_ADDRESS_OUT_OF_RANGE: u8 = 0x05;

/// Data type not supported
pub const RC_TYPE_NOT_SUPPORTED: u8 = 0x06;

/// Data type inconsistent
pub const RC_TYPE_INCONSISTENT: u8 = 0x07;

/// Object does not exist
pub const RC_OBJECT_MISSING: u8 = 0x0A;
