//! Result forwarding toward the supervisory side
//!
//! Read results leave the engine as [`ResultEntry`] values pushed into a
//! [`ResultSink`]. With smoothing enabled, a value is forwarded only when it
//! differs from the last forwarded value of the same variable.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use crate::item::{ItemStatus, WireItem};
use crate::session::DeviceSession;

/// Separator of the `device$address$period` key
pub const KEY_SEPARATOR: char = '$';

/// External name of a variable: `device$address$period`
pub fn external_name(device: &str, address: &str, period_secs: u64) -> String {
    format!(
        "{}{}{}{}{}",
        device, KEY_SEPARATOR, address, KEY_SEPARATOR, period_secs
    )
}

// ============================================================================
// Entries and sinks
// ============================================================================

/// One value delivered to the supervisory side
#[derive(Debug, Clone, PartialEq)]
pub struct ResultEntry {
    pub name: String,
    pub data: Bytes,
    pub timestamp: DateTime<Utc>,
}

impl ResultEntry {
    pub fn new(name: impl Into<String>, data: Bytes) -> Self {
        Self {
            name: name.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// Byte length of the payload
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Destination of completed results; implementations must not block
pub trait ResultSink: Send + Sync {
    fn push(&self, entries: Vec<ResultEntry>);
}

/// Lock-protected FIFO drained by a separate consumer
#[derive(Debug, Default)]
pub struct ResultQueue {
    entries: Mutex<VecDeque<ResultEntry>>,
    available: Notify,
}

impl ResultQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything queued so far
    pub fn drain(&self) -> Vec<ResultEntry> {
        self.entries.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Wait until at least one entry is queued
    pub async fn wait(&self) {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

impl ResultSink for ResultQueue {
    fn push(&self, entries: Vec<ResultEntry>) {
        if entries.is_empty() {
            return;
        }
        self.entries.lock().extend(entries);
        self.available.notify_waiters();
    }
}

// ============================================================================
// Publisher
// ============================================================================

/// Filters one device's read results and forwards them
#[derive(Clone)]
pub struct ResultPublisher {
    device: String,
    smoothing: bool,
    sink: Arc<dyn ResultSink>,
}

impl ResultPublisher {
    pub fn new(device: impl Into<String>, smoothing: bool, sink: Arc<dyn ResultSink>) -> Self {
        Self {
            device: device.into(),
            smoothing,
            sink,
        }
    }

    pub fn smoothing(&self) -> bool {
        self.smoothing
    }

    /// Forward successful items; returns how many were forwarded
    ///
    /// Failed items are logged and dropped. Items whose variable was removed
    /// while the exchange was in flight are dropped silently.
    pub fn publish(&self, session: &DeviceSession, items: Vec<WireItem>) -> usize {
        let mut forwarded = Vec::with_capacity(items.len());
        {
            let mut variables = session.lock_variables();
            for item in items {
                match item.status {
                    ItemStatus::Ok => {}
                    ItemStatus::Skipped | ItemStatus::Pending => {
                        trace!("{}: {} not read this cycle", self.device, item.name);
                        continue;
                    }
                    status => {
                        warn!("{}: read of {} failed: {:?}", self.device, item.name, status);
                        continue;
                    }
                }
                let Some(variable) = variables.get_mut(&item.name) else {
                    continue;
                };
                if self.smoothing && !variable.update_reading(&item.data) {
                    continue;
                }
                let name = external_name(&self.device, &item.name, variable.period().as_secs());
                forwarded.push(ResultEntry::new(name, item.data.freeze()));
            }
        }

        let count = forwarded.len();
        if count > 0 {
            debug!("{}: forwarding {} values", self.device, count);
            self.sink.push(forwarded);
        }
        count
    }

    /// Publish a single out-of-band entry (health, version)
    pub fn publish_signal(&self, name: impl Into<String>, data: Bytes) {
        self.sink.push(vec![ResultEntry::new(name, data)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::S7Address;
    use std::time::Duration;

    fn session_with(names: &[&str]) -> DeviceSession {
        let session = DeviceSession::new("10.0.0.5");
        for name in names {
            session.add_variable(name, Duration::from_secs(2)).unwrap();
        }
        session
    }

    fn read(name: &str, data: &[u8], status: ItemStatus) -> WireItem {
        let mut item = WireItem::for_read(name, S7Address::parse(name).unwrap());
        item.data.copy_from_slice(data);
        item.status = status;
        item
    }

    #[test]
    fn test_external_name() {
        assert_eq!(external_name("10.0.0.5", "VW0", 2), "10.0.0.5$VW0$2");
    }

    #[test]
    fn test_unfiltered_forwards_every_success() {
        let queue = Arc::new(ResultQueue::new());
        let publisher = ResultPublisher::new("10.0.0.5", false, queue.clone());
        let session = session_with(&["VW0", "VW2"]);

        for _ in 0..2 {
            let items = vec![
                read("VW0", &[0, 1], ItemStatus::Ok),
                read("VW2", &[0, 2], ItemStatus::Rejected(0x0A)),
            ];
            assert_eq!(publisher.publish(&session, items), 1);
        }

        let entries = queue.drain();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "10.0.0.5$VW0$2");
        assert_eq!(entries[0].len(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_smoothing_forwards_changes_only() {
        let queue = Arc::new(ResultQueue::new());
        let publisher = ResultPublisher::new("10.0.0.5", true, queue.clone());
        let session = session_with(&["VW0"]);

        let values: [&[u8]; 5] = [&[0, 0], &[0, 0], &[0, 5], &[0, 5], &[0, 0]];
        let forwarded: Vec<usize> = values
            .iter()
            .map(|v| publisher.publish(&session, vec![read("VW0", v, ItemStatus::Ok)]))
            .collect();
        assert_eq!(forwarded, vec![1, 0, 1, 0, 1]);

        let data: Vec<Vec<u8>> = queue.drain().iter().map(|e| e.data.to_vec()).collect();
        assert_eq!(data, vec![vec![0, 0], vec![0, 5], vec![0, 0]]);
    }

    #[test]
    fn test_failed_read_does_not_touch_snapshot() {
        let queue = Arc::new(ResultQueue::new());
        let publisher = ResultPublisher::new("10.0.0.5", true, queue.clone());
        let session = session_with(&["VW0"]);

        publisher.publish(&session, vec![read("VW0", &[0, 9], ItemStatus::Ok)]);
        publisher.publish(&session, vec![read("VW0", &[0, 1], ItemStatus::Failed(1))]);
        assert_eq!(
            publisher.publish(&session, vec![read("VW0", &[0, 9], ItemStatus::Ok)]),
            0
        );
    }

    #[test]
    fn test_removed_variable_is_dropped() {
        let queue = Arc::new(ResultQueue::new());
        let publisher = ResultPublisher::new("10.0.0.5", false, queue.clone());
        let session = session_with(&["VW0"]);
        session.remove_variable("VW0");

        assert_eq!(
            publisher.publish(&session, vec![read("VW0", &[0, 1], ItemStatus::Ok)]),
            0
        );
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_queue_wait_wakes_on_push() {
        let queue = Arc::new(ResultQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait().await })
        };
        tokio::task::yield_now().await;
        queue.push(vec![ResultEntry::new("_VERSION", Bytes::from_static(b"1\0"))]);
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_queue_wait_registers_waker() {
        let queue = ResultQueue::new();
        let mut wait = tokio_test::task::spawn(queue.wait());
        tokio_test::assert_pending!(wait.poll());

        queue.push(vec![ResultEntry::new("x", Bytes::from_static(&[1]))]);
        assert!(wait.is_woken());
        tokio_test::assert_ready!(wait.poll());
    }
}
