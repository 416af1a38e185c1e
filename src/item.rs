//! Request units exchanged with the device

use bytes::BytesMut;

use crate::address::S7Address;
use crate::constants::RC_SUCCESS;

/// Outcome of one item after an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    /// Not yet dispatched
    Pending,
    Ok,
    /// Device answered with a per-item return code other than success
    Rejected(u8),
    /// The whole exchange failed; carries [`S7Error::status_code`](crate::S7Error::status_code)
    Failed(u16),
    /// Not dispatched this cycle (failure threshold reached or worker stopping)
    Skipped,
}

impl ItemStatus {
    pub fn from_return_code(code: u8) -> Self {
        if code == RC_SUCCESS {
            Self::Ok
        } else {
            Self::Rejected(code)
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// One address plus the buffer it is read into or written from
#[derive(Debug, Clone)]
pub struct WireItem {
    /// Address text the variable was registered with
    pub name: String,
    pub address: S7Address,
    pub data: BytesMut,
    pub status: ItemStatus,
}

impl WireItem {
    /// Item with a zeroed buffer, ready to be read into
    pub fn for_read(name: impl Into<String>, address: S7Address) -> Self {
        Self {
            name: name.into(),
            data: address.allocate(),
            address,
            status: ItemStatus::Pending,
        }
    }

    /// Item carrying bytes to write
    pub fn for_write(name: impl Into<String>, address: S7Address, data: BytesMut) -> Self {
        Self {
            name: name.into(),
            address,
            data,
            status: ItemStatus::Pending,
        }
    }

    /// Bytes this item occupies on the wire
    pub fn size(&self) -> usize {
        self.address.byte_size()
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}
