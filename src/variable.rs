//! Per-variable runtime record

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::time::Instant;

use crate::address::S7Address;
use crate::error::S7Result;

/// One registered variable of a device.
///
/// Holds at most one pending write. The last-read snapshot starts zeroed and
/// is only meaningful once `has_reading` is set.
#[derive(Debug)]
pub struct DeviceItem {
    name: String,
    address: S7Address,
    period: Duration,
    last_poll: Option<Instant>,
    to_device: Option<Bytes>,
    from_device: BytesMut,
    has_reading: bool,
}

impl DeviceItem {
    /// Create a record for an address text; fails if the address is invalid
    pub fn new(name: impl Into<String>, period: Duration) -> S7Result<Self> {
        let name = name.into();
        let address = S7Address::parse(&name)?;
        Ok(Self {
            from_device: address.allocate(),
            name,
            address,
            period,
            last_poll: None,
            to_device: None,
            has_reading: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &S7Address {
        &self.address
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn last_poll(&self) -> Option<Instant> {
        self.last_poll
    }

    /// Due when `now - last_poll >= max(period, min_period)`; never-polled items are due
    pub fn is_due(&self, now: Instant, min_period: Duration) -> bool {
        match self.last_poll {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.period.max(min_period),
        }
    }

    pub fn mark_polled(&mut self, now: Instant) {
        self.last_poll = Some(now);
    }

    /// Make the next cycle poll this item regardless of its period
    pub fn force_due(&mut self) {
        self.last_poll = None;
    }

    /// Install a pending write, returning the unflushed one it replaces
    ///
    /// The payload is resized to the item's wire size.
    pub fn install_write(&mut self, data: Bytes) -> Option<Bytes> {
        let size = self.address.byte_size();
        let data = if data.len() == size {
            data
        } else {
            let mut resized = BytesMut::from(&data[..data.len().min(size)]);
            resized.resize(size, 0);
            resized.freeze()
        };
        self.to_device.replace(data)
    }

    /// Claim the pending write; a snapshot is handed out exactly once
    pub fn take_write(&mut self) -> Option<Bytes> {
        self.to_device.take()
    }

    pub fn has_pending_write(&self) -> bool {
        self.to_device.is_some()
    }

    /// Put back a write that was claimed but never dispatched
    ///
    /// Returns `false` and drops `data` if a newer write arrived meanwhile.
    pub fn restore_write(&mut self, data: Bytes) -> bool {
        if self.to_device.is_some() {
            return false;
        }
        self.to_device = Some(data);
        true
    }

    /// Compare a fresh reading against the snapshot and store it if it differs
    ///
    /// Returns whether the value changed (always true for the first reading).
    pub fn update_reading(&mut self, data: &[u8]) -> bool {
        if self.has_reading && self.from_device[..] == *data {
            return false;
        }
        if self.from_device.len() != data.len() {
            self.from_device = BytesMut::zeroed(data.len());
        }
        self.from_device.copy_from_slice(data);
        self.has_reading = true;
        true
    }

    /// Last stored reading
    pub fn last_reading(&self) -> Option<&[u8]> {
        self.has_reading.then_some(&self.from_device[..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(text: &str, secs: u64) -> DeviceItem {
        DeviceItem::new(text, Duration::from_secs(secs)).unwrap()
    }

    #[test]
    fn test_invalid_address_rejected() {
        assert!(DeviceItem::new("Z", Duration::from_secs(1)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_due_uses_larger_of_period_and_minimum() {
        let mut var = item("VW0", 1);
        let start = Instant::now();
        assert!(var.is_due(start, Duration::from_secs(2)));

        var.mark_polled(start);
        assert!(!var.is_due(start + Duration::from_secs(1), Duration::from_secs(2)));
        assert!(var.is_due(start + Duration::from_secs(2), Duration::from_secs(2)));

        var.force_due();
        assert!(var.is_due(start, Duration::from_secs(2)));
    }

    #[test]
    fn test_write_snapshot_claimed_once() {
        let mut var = item("VW0", 1);
        assert!(var.install_write(Bytes::from_static(&[1, 2])).is_none());
        let replaced = var.install_write(Bytes::from_static(&[3, 4]));
        assert_eq!(replaced.as_deref(), Some(&[1u8, 2][..]));

        assert_eq!(var.take_write().as_deref(), Some(&[3u8, 4][..]));
        assert!(var.take_write().is_none());
    }

    #[test]
    fn test_write_is_resized_to_wire_size() {
        let mut var = item("VD0", 1);
        var.install_write(Bytes::from_static(&[1, 2]));
        assert_eq!(var.take_write().as_deref(), Some(&[1u8, 2, 0, 0][..]));

        var.install_write(Bytes::from_static(&[1, 2, 3, 4, 5, 6]));
        assert_eq!(var.take_write().as_deref(), Some(&[1u8, 2, 3, 4][..]));
    }

    #[test]
    fn test_restore_yields_to_newer_write() {
        let mut var = item("VB0", 1);
        assert!(var.restore_write(Bytes::from_static(&[1])));
        assert!(var.has_pending_write());

        assert!(!var.restore_write(Bytes::from_static(&[2])));
        assert_eq!(var.take_write().as_deref(), Some(&[1u8][..]));
    }

    #[test]
    fn test_first_reading_always_changes() {
        let mut var = item("VW0", 1);
        assert!(var.last_reading().is_none());
        // zeros equal the initial snapshot but are still a first reading
        assert!(var.update_reading(&[0, 0]));
        assert!(!var.update_reading(&[0, 0]));
        assert!(var.update_reading(&[0, 1]));
        assert_eq!(var.last_reading(), Some(&[0u8, 1][..]));
    }
}
