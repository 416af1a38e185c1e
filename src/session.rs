//! Per-device variable registry and worker run state
//!
//! The registry is shared between the registration side (add, remove, queue
//! writes) and the device's poll worker. The lock guards map access and buffer
//! moves only; it is never held across an exchange with the device.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{S7Error, S7Result};
use crate::item::WireItem;
use crate::variable::DeviceItem;

/// Variables of one device plus the stop signal of its worker
#[derive(Debug)]
pub struct DeviceSession {
    device: String,
    variables: Mutex<BTreeMap<String, DeviceItem>>,
    running: AtomicBool,
    wakeup: Notify,
}

impl DeviceSession {
    /// New, stopped session
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            variables: Mutex::new(BTreeMap::new()),
            running: AtomicBool::new(false),
            wakeup: Notify::new(),
        }
    }

    /// Device identity (IP or `host:port`)
    pub fn device(&self) -> &str {
        &self.device
    }

    // ========================================================================
    // Registration side
    // ========================================================================

    /// Register a variable; returns `false` if it already existed
    pub fn add_variable(&self, name: &str, period: Duration) -> S7Result<bool> {
        let mut variables = self.variables.lock();
        if variables.contains_key(name) {
            debug!("{}: {} already registered", self.device, name);
            return Ok(false);
        }
        let item = DeviceItem::new(name, period)?;
        variables.insert(name.to_string(), item);
        info!(
            "{}: registered {} every {}s",
            self.device,
            name,
            period.as_secs()
        );
        Ok(true)
    }

    /// Drop a variable and its buffers; returns whether it existed
    pub fn remove_variable(&self, name: &str) -> bool {
        let removed = self.variables.lock().remove(name).is_some();
        if removed {
            info!("{}: unregistered {}", self.device, name);
        }
        removed
    }

    /// Install a pending write, replacing any unflushed one
    pub fn queue_pending_write(&self, name: &str, data: Bytes) -> S7Result<()> {
        let mut variables = self.variables.lock();
        let Some(item) = variables.get_mut(name) else {
            warn!("{}: write to unknown variable {} dropped", self.device, name);
            return Err(S7Error::unknown_variable(&self.device, name));
        };
        if item.install_write(data).is_some() {
            warn!(
                "{}: {} overwritten before the previous write was flushed",
                self.device, name
            );
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.lock().contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.variables.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.variables.lock().len()
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.variables.lock().keys().cloned().collect()
    }

    // ========================================================================
    // Run state
    // ========================================================================

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Set the run flag; returns `true` if the session was stopped before
    pub fn start(&self) -> bool {
        !self.running.swap(true, Ordering::AcqRel)
    }

    /// Clear the run flag and wake a sleeping worker
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.wakeup.notify_waiters();
    }

    /// Sleep unless stopped first; returns whether the session is still running
    pub async fn sleep_for(&self, duration: Duration) -> bool {
        let notified = self.wakeup.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if !self.is_running() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = &mut notified => {}
        }
        self.is_running()
    }

    // ========================================================================
    // Worker side
    // ========================================================================

    /// Read items for every due variable, marking them polled at `now`
    pub fn select_due(&self, now: Instant, min_period: Duration) -> Vec<WireItem> {
        let mut variables = self.variables.lock();
        variables
            .values_mut()
            .filter(|item| item.is_due(now, min_period))
            .map(|item| {
                item.mark_polled(now);
                WireItem::for_read(item.name(), *item.address())
            })
            .collect()
    }

    /// Claim every pending write; written variables become due immediately
    pub fn take_pending_writes(&self) -> Vec<WireItem> {
        let mut variables = self.variables.lock();
        variables
            .values_mut()
            .filter_map(|item| {
                let data = item.take_write()?;
                item.force_due();
                Some(WireItem::for_write(
                    item.name(),
                    *item.address(),
                    BytesMut::from(&data[..]),
                ))
            })
            .collect()
    }

    /// Return an undispatched write unless a newer one was queued
    pub fn restore_pending_write(&self, name: &str, data: Bytes) {
        let mut variables = self.variables.lock();
        if let Some(item) = variables.get_mut(name) {
            if item.restore_write(data) {
                debug!("{}: write to {} deferred to next cycle", self.device, name);
            } else {
                debug!("{}: deferred write to {} superseded", self.device, name);
            }
        }
    }

    /// Make a variable due again on the next cycle
    pub fn rewind_poll(&self, name: &str) {
        if let Some(item) = self.variables.lock().get_mut(name) {
            item.force_due();
        }
    }

    /// Lock the registry for a short compare-and-copy
    pub(crate) fn lock_variables(&self) -> MutexGuard<'_, BTreeMap<String, DeviceItem>> {
        self.variables.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const PERIOD: Duration = Duration::from_secs(1);

    #[test]
    fn test_registration_is_idempotent() {
        let session = DeviceSession::new("10.0.0.1");
        assert!(session.add_variable("VW0", PERIOD).unwrap());
        assert!(!session.add_variable("VW0", PERIOD).unwrap());
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn test_invalid_registration_refused() {
        let session = DeviceSession::new("10.0.0.1");
        assert!(session.add_variable("Z", PERIOD).is_err());
        assert!(session.is_empty());
    }

    #[test]
    fn test_remove_variable() {
        let session = DeviceSession::new("10.0.0.1");
        session.add_variable("VW0", PERIOD).unwrap();
        assert!(session.remove_variable("VW0"));
        assert!(!session.remove_variable("VW0"));
        assert!(session.is_empty());
    }

    #[test]
    fn test_write_to_unknown_variable() {
        let session = DeviceSession::new("10.0.0.1");
        let err = session
            .queue_pending_write("VW0", Bytes::from_static(&[0, 1]))
            .unwrap_err();
        assert!(matches!(err, S7Error::UnknownVariable { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_pending_writes_forces_poll() {
        let session = DeviceSession::new("10.0.0.1");
        session.add_variable("VW0", Duration::from_secs(60)).unwrap();
        session.add_variable("VW2", Duration::from_secs(60)).unwrap();

        let now = Instant::now();
        assert_eq!(session.select_due(now, PERIOD).len(), 2);
        assert!(session.select_due(now, PERIOD).is_empty());

        session
            .queue_pending_write("VW2", Bytes::from_static(&[0, 7]))
            .unwrap();
        let writes = session.take_pending_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(&writes[0].data[..], &[0, 7]);
        assert!(session.take_pending_writes().is_empty());

        let due = session.select_due(now, PERIOD);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].name, "VW2");
    }

    #[test]
    fn test_restore_pending_write() {
        let session = DeviceSession::new("10.0.0.1");
        session.add_variable("VB0", PERIOD).unwrap();
        session
            .queue_pending_write("VB0", Bytes::from_static(&[1]))
            .unwrap();
        let mut writes = session.take_pending_writes();
        let item = writes.remove(0);

        session.restore_pending_write("VB0", item.data.freeze());
        let again = session.take_pending_writes();
        assert_eq!(&again[0].data[..], &[1]);
    }

    #[test]
    fn test_queued_write_replaces_unflushed() {
        let session = DeviceSession::new("10.0.0.1");
        session.add_variable("VB0", PERIOD).unwrap();
        for value in [1u8, 2] {
            session
                .queue_pending_write("VB0", Bytes::copy_from_slice(&[value]))
                .unwrap();
        }
        let writes = session.take_pending_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(&writes[0].data[..], &[2]);
    }

    #[test]
    fn test_restore_keeps_newer_write() {
        let session = DeviceSession::new("10.0.0.1");
        session.add_variable("VB0", PERIOD).unwrap();
        session
            .queue_pending_write("VB0", Bytes::from_static(&[1]))
            .unwrap();
        let stale = session.take_pending_writes().remove(0);
        session
            .queue_pending_write("VB0", Bytes::from_static(&[2]))
            .unwrap();

        session.restore_pending_write("VB0", stale.data.freeze());
        let writes = session.take_pending_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(&writes[0].data[..], &[2]);

        // unknown names are ignored
        session.restore_pending_write("VB9", Bytes::from_static(&[3]));
        assert!(session.take_pending_writes().is_empty());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let session = DeviceSession::new("10.0.0.1");
        assert!(!session.is_running());
        assert!(session.start());
        assert!(!session.start());
        session.stop();
        assert!(!session.is_running());
        assert!(!session.sleep_for(Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn test_stop_interrupts_sleep() {
        let session = Arc::new(DeviceSession::new("10.0.0.1"));
        session.start();

        let sleeper = {
            let session = session.clone();
            tokio::spawn(async move { session.sleep_for(Duration::from_secs(3600)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.stop();

        let still_running = tokio::time::timeout(Duration::from_secs(5), sleeper)
            .await
            .expect("sleep was not interrupted")
            .unwrap();
        assert!(!still_running);
    }
}
