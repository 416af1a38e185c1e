//! Device link lifecycle
//!
//! [`ConnectionManager`] owns the transport of one device. It reconnects with
//! a fixed backoff, counts consecutive exchange failures and publishes a
//! `<device>.connectionError` health entry whenever the link state changes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::constants::RECONNECT_DELAY;
use crate::error::S7Result;
use crate::item::WireItem;
use crate::publisher::ResultPublisher;
use crate::session::DeviceSession;
use crate::transport::{Endpoint, S7Transport, TransportStats};

/// Suffix of the per-device health entry
pub const HEALTH_SUFFIX: &str = ".connectionError";

/// Name of the health entry of a device
pub fn health_name(device: &str) -> String {
    format!("{}{}", device, HEALTH_SUFFIX)
}

/// Redundancy role shared by every worker.
///
/// Only the active side polls and publishes health.
#[derive(Debug, Clone)]
pub struct DeviceRole {
    active: Arc<AtomicBool>,
}

impl Default for DeviceRole {
    fn default() -> Self {
        Self::new(true)
    }
}

impl DeviceRole {
    pub fn new(active: bool) -> Self {
        Self {
            active: Arc::new(AtomicBool::new(active)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Switch role; returns whether it changed
    pub fn set_active(&self, active: bool) -> bool {
        self.active.swap(active, Ordering::AcqRel) != active
    }
}

// ============================================================================
// Connection manager
// ============================================================================

/// Transport of one device plus its health bookkeeping
pub struct ConnectionManager<T: S7Transport> {
    transport: T,
    endpoint: Endpoint,
    session: Arc<DeviceSession>,
    publisher: ResultPublisher,
    role: DeviceRole,
    max_io_failures: u32,
    io_failures: u32,
    was_connected: bool,
    last_health: Option<bool>,
    reconnect_delay: Duration,
}

impl<T: S7Transport> ConnectionManager<T> {
    pub fn new(
        transport: T,
        endpoint: Endpoint,
        session: Arc<DeviceSession>,
        publisher: ResultPublisher,
        role: DeviceRole,
        max_io_failures: u32,
    ) -> Self {
        Self {
            transport,
            endpoint,
            session,
            publisher,
            role,
            max_io_failures: max_io_failures.max(1),
            io_failures: 0,
            was_connected: false,
            last_health: None,
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    pub fn device(&self) -> &str {
        self.session.device()
    }

    /// Open the link; health is published after every attempt
    pub async fn connect(&mut self) -> bool {
        match self.transport.connect(&self.endpoint).await {
            Ok(()) => {
                self.was_connected = true;
                self.io_failures = 0;
                debug!(
                    "{}: connected, PDU {}",
                    self.device(),
                    self.transport.pdu_size()
                );
            }
            Err(e) => warn!("{}: connect failed: {}", self.device(), e),
        }
        let connected = self.transport.is_connected();
        self.publish_health(connected, false);
        connected
    }

    pub async fn disconnect(&mut self) {
        if let Err(e) = self.transport.close().await {
            debug!("{}: close failed: {}", self.device(), e);
        }
        self.was_connected = false;
        self.io_failures = 0;
    }

    /// Make sure the link is usable, reconnecting every few seconds until it
    /// is or the session stops. Returns `false` only when stopped.
    pub async fn ensure_connection(&mut self, role_changed: bool) -> bool {
        let connected = self.transport.is_connected();
        if role_changed {
            self.publish_health(connected, true);
        }
        if connected && !self.failures_exhausted() {
            return true;
        }

        if self.was_connected {
            warn!(
                "{}: link lost after {} failed exchanges",
                self.device(),
                self.io_failures
            );
            self.publish_health(false, false);
        }

        loop {
            if !self.session.is_running() {
                return false;
            }
            self.disconnect().await;
            if self.connect().await {
                break;
            }
            if !self.session.sleep_for(self.reconnect_delay).await {
                return false;
            }
        }

        info!("{}: link restored", self.device());
        true
    }

    /// Publish the health entry unless passive or unchanged
    fn publish_health(&mut self, connected: bool, force: bool) {
        if !self.role.is_active() {
            return;
        }
        let error = !connected;
        if !force && self.last_health == Some(error) {
            return;
        }
        self.last_health = Some(error);
        self.publisher
            .publish_signal(health_name(self.device()), Bytes::from(vec![error as u8]));
    }

    // ========================================================================
    // Exchanges
    // ========================================================================

    pub async fn read_multi(&mut self, items: &mut [WireItem]) -> S7Result<()> {
        let result = self.transport.read_multi_vars(items).await;
        self.record(result, "read")
    }

    pub async fn write_multi(&mut self, items: &mut [WireItem]) -> S7Result<()> {
        let result = self.transport.write_multi_vars(items).await;
        self.record(result, "write")
    }

    pub async fn read_area(&mut self, item: &mut WireItem) -> S7Result<()> {
        let result = self.transport.read_area(item).await;
        self.record(result, "area read")
    }

    pub async fn write_area(&mut self, item: &mut WireItem) -> S7Result<()> {
        let result = self.transport.write_area(item).await;
        self.record(result, "area write")
    }

    fn record(&mut self, result: S7Result<()>, operation: &str) -> S7Result<()> {
        if let Err(e) = &result {
            self.io_failures += 1;
            warn!(
                "{}: {} failed ({}/{}): {}",
                self.device(),
                operation,
                self.io_failures,
                self.max_io_failures,
                e
            );
        }
        result
    }

    /// No further exchanges this cycle
    pub fn failures_exhausted(&self) -> bool {
        self.io_failures >= self.max_io_failures
    }

    pub fn io_failures(&self) -> u32 {
        self.io_failures
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn negotiated_pdu(&self) -> usize {
        self.transport.pdu_size()
    }

    pub fn stats(&self) -> TransportStats {
        self.transport.get_stats()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}
