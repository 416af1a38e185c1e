//! Per-device poll worker
//!
//! Each cycle flushes pending writes, reads every due variable and forwards
//! the results. Written variables are read back in the same cycle.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;
use tracing::{error, info, trace, warn};

use crate::config::DriverConfig;
use crate::connection::{ConnectionManager, DeviceRole};
use crate::constants::PASSIVE_SLEEP;
use crate::item::ItemStatus;
use crate::publisher::ResultPublisher;
use crate::scheduler::{BatchScheduler, BatchSummary, Direction};
use crate::session::DeviceSession;
use crate::transport::S7Transport;

/// What one cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub writes: BatchSummary,
    pub reads: BatchSummary,
    /// Values handed to the result sink
    pub forwarded: usize,
}

/// Worker driving one device session
pub struct PollLoop<T: S7Transport> {
    connection: ConnectionManager<T>,
    session: Arc<DeviceSession>,
    publisher: ResultPublisher,
    scheduler: BatchScheduler,
    role: DeviceRole,
    min_period: Duration,
    cycle_interval: Duration,
}

impl<T: S7Transport> PollLoop<T> {
    pub fn new(
        transport: T,
        session: Arc<DeviceSession>,
        publisher: ResultPublisher,
        role: DeviceRole,
        config: &DriverConfig,
    ) -> Self {
        let connection = ConnectionManager::new(
            transport,
            config.endpoint(session.device()),
            session.clone(),
            publisher.clone(),
            role.clone(),
            config.max_io_failures,
        );
        Self {
            connection,
            session,
            publisher,
            scheduler: BatchScheduler::new(config.limits),
            role,
            min_period: config.polling_interval(),
            cycle_interval: config.cycle_interval(),
        }
    }

    pub fn connection(&self) -> &ConnectionManager<T> {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut ConnectionManager<T> {
        &mut self.connection
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    /// Run until the session stops
    pub async fn run(mut self) {
        let device = self.session.device().to_string();
        info!("{}: poll worker started", device);

        let mut was_active = self.role.is_active();
        if was_active {
            self.connection.connect().await;
        }

        while self.session.is_running() {
            let active = self.role.is_active();
            let role_changed = active != was_active;
            was_active = active;

            if !active {
                if role_changed {
                    info!("{}: passive, polling suspended", device);
                }
                if !self.session.sleep_for(PASSIVE_SLEEP).await {
                    break;
                }
                continue;
            }

            let started = Instant::now();
            if !self.connection.ensure_connection(role_changed).await {
                break;
            }

            match AssertUnwindSafe(self.cycle()).catch_unwind().await {
                Ok(report) => trace!("{}: cycle {:?}", device, report),
                Err(panic) => error!("{}: poll cycle failed: {}", device, panic_message(&*panic)),
            }

            let remaining = self.cycle_interval.saturating_sub(started.elapsed());
            if !self.session.sleep_for(remaining).await {
                break;
            }
        }

        self.connection.disconnect().await;
        info!("{}: poll worker stopped", device);
    }

    /// One write-then-read pass
    pub async fn cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        let mut writes = self.session.take_pending_writes();
        if !writes.is_empty() {
            report.writes = self
                .scheduler
                .execute(&mut self.connection, &self.session, &mut writes, Direction::Write)
                .await;
            for item in writes {
                match item.status {
                    ItemStatus::Ok => {}
                    ItemStatus::Skipped | ItemStatus::Pending => {
                        self.session.restore_pending_write(&item.name, item.data.freeze())
                    }
                    status => warn!(
                        "{}: write of {} failed: {:?}",
                        self.session.device(),
                        item.name,
                        status
                    ),
                }
            }
        }

        let mut reads = self.session.select_due(Instant::now(), self.min_period);
        if !reads.is_empty() {
            report.reads = self
                .scheduler
                .execute(&mut self.connection, &self.session, &mut reads, Direction::Read)
                .await;
            for item in reads.iter().filter(|i| i.status == ItemStatus::Skipped) {
                self.session.rewind_poll(&item.name);
            }
            report.forwarded = self.publisher.publish(&self.session, reads);
        }

        report
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::ResultQueue;
    use crate::transport::{MemoryTransport, TransportCall};
    use bytes::Bytes;

    fn worker(
        device: &MemoryTransport,
        config: &DriverConfig,
    ) -> (PollLoop<MemoryTransport>, Arc<ResultQueue>) {
        let queue = Arc::new(ResultQueue::new());
        let session = Arc::new(DeviceSession::new("sim"));
        session.start();
        let publisher = ResultPublisher::new("sim", config.smoothing, queue.clone());
        let poll = PollLoop::new(
            device.clone(),
            session,
            publisher,
            DeviceRole::default(),
            config,
        );
        (poll, queue)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_writes_before_reads() {
        let device = MemoryTransport::new();
        let (mut poll, queue) = worker(&device, &DriverConfig::default());
        poll.session.add_variable("VW0", Duration::from_secs(1)).unwrap();
        poll.session.add_variable("VW2", Duration::from_secs(1)).unwrap();
        poll.connection.connect().await;
        queue.drain();

        poll.session
            .queue_pending_write("VW2", Bytes::from_static(&[0x12, 0x34]))
            .unwrap();
        device.clear_calls();
        let report = poll.cycle().await;

        assert_eq!(report.writes.exchanges, 1);
        assert_eq!(report.reads.exchanges, 1);
        assert_eq!(
            device.calls(),
            vec![
                TransportCall::WriteMulti(vec!["VW2".into()]),
                TransportCall::ReadMulti(vec!["VW0".into(), "VW2".into()]),
            ]
        );
        let entries = queue.drain();
        let written = entries.iter().find(|e| e.name == "sim$VW2$1").unwrap();
        assert_eq!(&written.data[..], &[0x12, 0x34]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skipped_write_is_retried() {
        let device = MemoryTransport::new();
        let (mut poll, _queue) = worker(&device, &DriverConfig::default());
        poll.session.add_variable("VW0", Duration::from_secs(1)).unwrap();
        poll.session.add_variable("VW2", Duration::from_secs(1)).unwrap();
        poll.connection.connect().await;

        // the first write batch fails, so nothing else is dispatched this cycle
        let mut limits = crate::limits::BatchLimits::default();
        limits.write.max_items = 1;
        poll.scheduler = BatchScheduler::new(limits);
        poll.session
            .queue_pending_write("VW0", Bytes::from_static(&[0, 1]))
            .unwrap();
        poll.session
            .queue_pending_write("VW2", Bytes::from_static(&[0, 2]))
            .unwrap();
        device.fail_next(1);

        let report = poll.cycle().await;
        assert_eq!(report.writes.failed, 1);
        assert_eq!(report.writes.skipped, 1);
        assert_eq!(report.reads.skipped, 2);
        assert_eq!(report.forwarded, 0);

        assert!(poll.connection.ensure_connection(false).await);
        poll.cycle().await;
        assert_eq!(device.peek("VW0").unwrap(), vec![0, 0]);
        assert_eq!(device.peek("VW2").unwrap(), vec![0, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_period_is_respected() {
        let device = MemoryTransport::new();
        let config = DriverConfig::default().with_polling_interval_secs(1);
        let (mut poll, _queue) = worker(&device, &config);
        poll.session.add_variable("VW0", Duration::from_secs(5)).unwrap();
        poll.connection.connect().await;

        assert_eq!(poll.cycle().await.reads.exchanges, 1);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(poll.cycle().await.reads.exchanges, 0);
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(poll.cycle().await.reads.exchanges, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_promptly() {
        let device = MemoryTransport::new();
        let (poll, _queue) = worker(&device, &DriverConfig::default());
        let session = poll.session.clone();
        session.add_variable("VW0", Duration::from_secs(1)).unwrap();

        let task = tokio::spawn(poll.run());
        tokio::time::sleep(Duration::from_millis(2500)).await;
        session.stop();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("worker did not stop")
            .unwrap();

        assert_eq!(device.calls().last(), Some(&TransportCall::Close));
        assert!(!device.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_passive_worker_does_not_poll() {
        let device = MemoryTransport::new();
        let queue = Arc::new(ResultQueue::new());
        let session = Arc::new(DeviceSession::new("sim"));
        session.start();
        session.add_variable("VW0", Duration::from_secs(1)).unwrap();
        let role = DeviceRole::new(false);
        let poll = PollLoop::new(
            device.clone(),
            session.clone(),
            ResultPublisher::new("sim", true, queue.clone()),
            role.clone(),
            &DriverConfig::default(),
        );

        let task = tokio::spawn(poll.run());
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(device.exchange_count(), 0);
        assert!(queue.is_empty());

        role.set_active(true);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(device.exchange_count() > 0);

        session.stop();
        task.await.unwrap();
    }
}
