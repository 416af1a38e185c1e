//! Device registry and public entry point
//!
//! [`S7Service`] turns `device$address$period` keys into per-device sessions,
//! spawns one poll worker per device and routes writes. A worker is stopped
//! and its session dropped when its last variable is unregistered.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::address::S7Address;
use crate::config::DriverConfig;
use crate::connection::DeviceRole;
use crate::error::{S7Error, S7Result};
use crate::logging::{LogHandle, LogLevel};
use crate::poll::PollLoop;
use crate::publisher::{external_name, ResultEntry, ResultPublisher, ResultSink, KEY_SEPARATOR};
use crate::session::DeviceSession;
use crate::transport::{S7Transport, TcpTransport};
use crate::value::{S7Value, WireType};

/// Configuration address setting the log verbosity (big-endian u16)
pub const DEBUG_LEVEL_ADDRESS: &str = "_DEBUGLVL";

/// Entry published once at startup with the crate version
pub const VERSION_ADDRESS: &str = "_VERSION";

// ============================================================================
// Registration keys
// ============================================================================

/// Parsed `device$address$period` key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationKey {
    pub device: String,
    pub address: S7Address,
    /// Address text as registered
    pub name: String,
    pub period_secs: u64,
}

impl RegistrationKey {
    /// Parse and validate a key; the address must parse
    pub fn parse(key: &str) -> S7Result<Self> {
        let mut parts = key.split(KEY_SEPARATOR);
        let (Some(device), Some(name), Some(period), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(S7Error::invalid_address(
                key,
                "expected device$address$period",
            ));
        };
        if device.is_empty() {
            return Err(S7Error::invalid_address(key, "empty device"));
        }
        let period_secs = period
            .trim()
            .parse::<u64>()
            .map_err(|_| S7Error::invalid_address(key, "period is not a number of seconds"))?;
        let address = S7Address::parse(name)?;

        Ok(Self {
            device: device.to_string(),
            address,
            name: name.to_string(),
            period_secs,
        })
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}

impl FromStr for RegistrationKey {
    type Err = S7Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RegistrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&external_name(&self.device, &self.name, self.period_secs))
    }
}

// ============================================================================
// Service
// ============================================================================

struct DeviceWorker {
    session: Arc<DeviceSession>,
    handle: JoinHandle<()>,
}

type TransportFactory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Registry of device sessions and their workers.
///
/// Registration spawns tasks and must happen inside a tokio runtime.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use voltage_s7::{DriverConfig, ResultQueue, S7Service};
///
/// # async fn run() -> voltage_s7::S7Result<()> {
/// let queue = Arc::new(ResultQueue::new());
/// let service = S7Service::tcp(DriverConfig::default(), queue.clone());
/// service.start();
/// service.register_variable("192.168.0.10$VW0$2")?;
///
/// queue.wait().await;
/// for entry in queue.drain() {
///     println!("{} = {:?}", entry.name, entry.data);
/// }
/// service.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct S7Service<T: S7Transport + 'static> {
    config: Arc<DriverConfig>,
    factory: TransportFactory<T>,
    sink: Arc<dyn ResultSink>,
    role: DeviceRole,
    log: Option<LogHandle>,
    devices: Mutex<HashMap<String, DeviceWorker>>,
    retired: Mutex<Vec<JoinHandle<()>>>,
}

impl S7Service<TcpTransport> {
    /// Service talking ISO-on-TCP to real devices
    pub fn tcp(config: DriverConfig, sink: Arc<dyn ResultSink>) -> Self {
        let connect_timeout = config.connect_timeout();
        let request_timeout = config.request_timeout();
        Self::new(config, sink, move || {
            TcpTransport::new(connect_timeout, request_timeout)
        })
    }
}

impl<T: S7Transport + 'static> S7Service<T> {
    pub fn new(
        config: DriverConfig,
        sink: Arc<dyn ResultSink>,
        factory: impl Fn() -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            config: Arc::new(config),
            factory: Box::new(factory),
            sink,
            role: DeviceRole::default(),
            log: None,
            devices: Mutex::new(HashMap::new()),
            retired: Mutex::new(Vec::new()),
        }
    }

    /// Route `_DEBUGLVL` writes to this handle
    pub fn with_log_handle(mut self, handle: LogHandle) -> Self {
        self.log = Some(handle);
        self
    }

    pub fn with_role(mut self, role: DeviceRole) -> Self {
        self.role = role;
        self
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn role(&self) -> &DeviceRole {
        &self.role
    }

    /// Publish the version entry
    pub fn start(&self) {
        let mut version = crate::VERSION.as_bytes().to_vec();
        version.push(0);
        self.sink
            .push(vec![ResultEntry::new(VERSION_ADDRESS, Bytes::from(version))]);
        info!("voltage_s7 {} started", crate::VERSION);
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register a variable; returns `false` if it was already registered
    pub fn register_variable(&self, key: &str) -> S7Result<bool> {
        let key = RegistrationKey::parse(key)?;
        let mut devices = self.devices.lock();
        let worker = devices
            .entry(key.device.clone())
            .or_insert_with(|| self.spawn_worker(&key.device));
        worker.session.add_variable(&key.name, key.period())
    }

    /// Unregister a variable; returns whether it existed
    pub fn unregister_variable(&self, key: &str) -> S7Result<bool> {
        let key = RegistrationKey::parse(key)?;
        let mut devices = self.devices.lock();
        let Some(worker) = devices.get(&key.device) else {
            debug!("{}: unregister on unknown device", key.device);
            return Ok(false);
        };
        let removed = worker.session.remove_variable(&key.name);

        if worker.session.is_empty() {
            if let Some(worker) = devices.remove(&key.device) {
                info!("{}: last variable removed, stopping worker", key.device);
                worker.session.stop();
                let mut retired = self.retired.lock();
                retired.retain(|handle| !handle.is_finished());
                retired.push(worker.handle);
            }
        }
        Ok(removed)
    }

    fn spawn_worker(&self, device: &str) -> DeviceWorker {
        let session = Arc::new(DeviceSession::new(device));
        session.start();
        let publisher = ResultPublisher::new(device, self.config.smoothing, self.sink.clone());
        let poll = PollLoop::new(
            (self.factory)(),
            session.clone(),
            publisher,
            self.role.clone(),
            &self.config,
        );
        info!("{}: new device session", device);
        DeviceWorker {
            session,
            handle: tokio::spawn(poll.run()),
        }
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Queue raw bytes for a variable, or apply a configuration address
    pub fn write(&self, key: &str, data: Bytes) -> S7Result<()> {
        if !key.contains(KEY_SEPARATOR) {
            return self.write_config(key, &data);
        }
        let key = RegistrationKey::parse(key)?;
        self.session(&key.device)
            .ok_or_else(|| S7Error::unknown_device(&key.device))?
            .queue_pending_write(&key.name, data)
    }

    /// Encode a typed value for the variable's wire type and queue it
    pub fn write_value(&self, key: &str, value: S7Value) -> S7Result<()> {
        if !key.contains(KEY_SEPARATOR) {
            let data = WireType::U16.encode(&value)?;
            return self.write_config(key, &data);
        }
        let parsed = RegistrationKey::parse(key)?;
        let data = WireType::for_address(&parsed.address).encode(&value)?;
        self.write(key, data)
    }

    fn write_config(&self, name: &str, data: &[u8]) -> S7Result<()> {
        match name {
            DEBUG_LEVEL_ADDRESS => {
                let [hi, lo, ..] = data else {
                    return Err(S7Error::invalid_data(format!(
                        "{} expects 2 bytes, got {}",
                        name,
                        data.len()
                    )));
                };
                let level = LogLevel::from_verbosity(u16::from_be_bytes([*hi, *lo]));
                match &self.log {
                    Some(handle) => handle.set_level(level),
                    None => {
                        warn!("No log handle attached, ignoring level {}", level);
                        Ok(())
                    }
                }
            }
            other => Err(S7Error::configuration(format!(
                "Unknown configuration address {}",
                other
            ))),
        }
    }

    // ========================================================================
    // Introspection & shutdown
    // ========================================================================

    pub fn session(&self, device: &str) -> Option<Arc<DeviceSession>> {
        self.devices.lock().get(device).map(|w| w.session.clone())
    }

    pub fn device_count(&self) -> usize {
        self.devices.lock().len()
    }

    pub fn devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = self.devices.lock().keys().cloned().collect();
        devices.sort();
        devices
    }

    /// Stop every worker and wait for them to disconnect
    pub async fn stop(&self) {
        let mut handles: Vec<JoinHandle<()>> = {
            let mut devices = self.devices.lock();
            devices
                .drain()
                .map(|(_, worker)| {
                    worker.session.stop();
                    worker.handle
                })
                .collect()
        };
        handles.append(&mut *self.retired.lock());

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Poll worker ended abnormally: {}", e);
            }
        }
        info!("All poll workers stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::ResultQueue;
    use crate::transport::MemoryTransport;

    fn service() -> (S7Service<MemoryTransport>, MemoryTransport, Arc<ResultQueue>) {
        let device = MemoryTransport::new();
        let queue = Arc::new(ResultQueue::new());
        let factory = device.clone();
        let service = S7Service::new(DriverConfig::default(), queue.clone(), move || {
            factory.clone()
        });
        (service, device, queue)
    }

    #[test]
    fn test_parse_key() {
        let key = RegistrationKey::parse("10.0.0.1$VB2978.20$5").unwrap();
        assert_eq!(key.device, "10.0.0.1");
        assert_eq!(key.name, "VB2978.20");
        assert_eq!(key.address.count, 20);
        assert_eq!(key.period(), Duration::from_secs(5));
        assert_eq!(key.to_string(), "10.0.0.1$VB2978.20$5");
    }

    #[test]
    fn test_parse_key_rejects_garbage() {
        assert!(RegistrationKey::parse("10.0.0.1$VW0").is_err());
        assert!(RegistrationKey::parse("10.0.0.1$VW0$x").is_err());
        assert!(RegistrationKey::parse("10.0.0.1$Z$1").is_err());
        assert!(RegistrationKey::parse("$VW0$1").is_err());
        assert!(RegistrationKey::parse("a$VW0$1$2").is_err());
    }

    #[tokio::test]
    async fn test_start_publishes_version() {
        let (service, _device, queue) = service();
        service.start();
        let entries = queue.drain();
        assert_eq!(entries[0].name, "_VERSION");
        assert_eq!(entries[0].data.last(), Some(&0));
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let (service, _device, _queue) = service();
        assert!(service.register_variable("plc$VW0$1").unwrap());
        assert!(!service.register_variable("plc$VW0$1").unwrap());
        assert!(service.register_variable("plc$VW2$1").unwrap());
        assert_eq!(service.device_count(), 1);

        let session = service.session("plc").unwrap();
        assert!(service.unregister_variable("plc$VW0$1").unwrap());
        assert_eq!(service.device_count(), 1);
        assert!(service.unregister_variable("plc$VW2$1").unwrap());
        assert_eq!(service.device_count(), 0);
        assert!(!session.is_running());

        service.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_workers_are_released() {
        let (service, _device, _queue) = service();
        for _ in 0..50 {
            service.register_variable("plc$VW0$1").unwrap();
            service.unregister_variable("plc$VW0$1").unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // only the most recently stopped worker can still be held
        assert!(service.retired.lock().len() <= 1);
        service.stop().await;
        assert!(service.retired.lock().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_registration_creates_no_device() {
        let (service, _device, _queue) = service();
        assert!(service.register_variable("plc$Q$1").is_err());
        assert_eq!(service.device_count(), 0);
    }

    #[tokio::test]
    async fn test_write_routing() {
        let (service, _device, _queue) = service();
        let err = service
            .write("plc$VW0$1", Bytes::from_static(&[0, 1]))
            .unwrap_err();
        assert!(matches!(err, S7Error::UnknownDevice { .. }));

        service.register_variable("plc$VW0$1").unwrap();
        service.write_value("plc$VW0$1", S7Value::U16(7)).unwrap();
        let err = service
            .write("plc$VW2$1", Bytes::from_static(&[0, 1]))
            .unwrap_err();
        assert!(matches!(err, S7Error::UnknownVariable { .. }));

        service.stop().await;
    }

    #[tokio::test]
    async fn test_debug_level_address() {
        let (service, _device, _queue) = service();
        let service = service.with_log_handle(LogHandle::detached(LogLevel::Info));

        service
            .write(DEBUG_LEVEL_ADDRESS, Bytes::from_static(&[0, 2]))
            .unwrap();
        assert_eq!(service.log.as_ref().unwrap().level(), LogLevel::Debug);

        service
            .write_value(DEBUG_LEVEL_ADDRESS, S7Value::U16(0))
            .unwrap();
        assert_eq!(service.log.as_ref().unwrap().level(), LogLevel::Warn);

        assert!(service.write(DEBUG_LEVEL_ADDRESS, Bytes::from_static(&[1])).is_err());
        assert!(service.write("_NOPE", Bytes::from_static(&[0, 1])).is_err());
    }
}
