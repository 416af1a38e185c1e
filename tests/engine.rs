//! End-to-end tests of the poll engine against the simulated device.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use voltage_s7::{
    DeviceRole, DeviceSession, DriverConfig, MemoryTransport, PollLoop, ResultEntry,
    ResultPublisher, ResultQueue, S7Service, S7Value, TransportCall,
};

fn config() -> DriverConfig {
    DriverConfig::default()
        .with_tsaps(0x0100, 0x0200)
        .with_polling_interval_secs(1)
        .with_cycle_interval_secs(1)
}

fn service(
    config: DriverConfig,
) -> (S7Service<MemoryTransport>, MemoryTransport, Arc<ResultQueue>) {
    let device = MemoryTransport::new();
    let queue = Arc::new(ResultQueue::new());
    let handle = device.clone();
    let service = S7Service::new(config, queue.clone(), move || handle.clone());
    (service, device, queue)
}

fn named<'a>(entries: &'a [ResultEntry], name: &str) -> Vec<&'a ResultEntry> {
    entries.iter().filter(|e| e.name == name).collect()
}

#[tokio::test(start_paused = true)]
async fn test_write_then_read_round_trip() {
    let (service, device, queue) = service(config());
    service.register_variable("plc$VW10$1").unwrap();
    service.register_variable("plc$MD4$1").unwrap();
    service
        .write_value("plc$VW10$1", S7Value::U16(0x1234))
        .unwrap();
    service
        .write_value("plc$MD4$1", S7Value::Float(21.5))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(device.peek("VW10").unwrap(), vec![0x12, 0x34]);
    assert_eq!(device.peek("MD4").unwrap(), 21.5f32.to_be_bytes().to_vec());

    let entries = queue.drain();
    let word = named(&entries, "plc$VW10$1");
    assert_eq!(&word[0].data[..], &[0x12, 0x34]);
    let real = named(&entries, "plc$MD4$1");
    assert_eq!(&real[0].data[..], &21.5f32.to_be_bytes());

    service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_writes_go_out_before_reads() {
    let (service, device, _queue) = service(config());
    service.register_variable("plc$VW0$10").unwrap();
    service.register_variable("plc$VW2$10").unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    device.clear_calls();
    service
        .write("plc$VW2$10", Bytes::from_static(&[0xAB, 0xCD]))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    // the written variable is read back in the same cycle; VW0 is not due yet
    assert_eq!(
        device.calls(),
        vec![
            TransportCall::WriteMulti(vec!["VW2".into()]),
            TransportCall::ReadMulti(vec!["VW2".into()]),
        ]
    );
    service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_single_failure_suspends_cycle_until_reconnect() {
    let device = MemoryTransport::new();
    let queue = Arc::new(ResultQueue::new());
    let session = Arc::new(DeviceSession::new("plc"));
    session.start();
    for i in 0..25 {
        session
            .add_variable(&format!("VW{}", i * 2), Duration::from_secs(1))
            .unwrap();
    }
    let mut poll = PollLoop::new(
        device.clone(),
        session.clone(),
        ResultPublisher::new("plc", false, queue.clone()),
        DeviceRole::default(),
        &config().with_max_io_failures(1),
    );
    assert!(poll.connection_mut().connect().await);

    device.clear_calls();
    device.fail_next(1);
    let report = poll.cycle().await;
    assert_eq!(device.exchange_count(), 1);
    assert_eq!(report.reads.failed, 19);
    assert_eq!(report.reads.skipped, 6);
    assert_eq!(poll.connection().io_failures(), 1);
    assert!(queue.drain().iter().all(|e| e.name == "plc.connectionError"));

    assert!(poll.connection_mut().ensure_connection(false).await);
    assert_eq!(poll.connection().io_failures(), 0);

    // skipped variables were made due again
    let report = poll.cycle().await;
    assert_eq!(report.reads.exchanges, 1);
    assert_eq!(report.forwarded, 6);
}

#[tokio::test(start_paused = true)]
async fn test_smoothing_forwards_changes_once() {
    let (service, device, queue) = service(config().with_smoothing(true));
    service.register_variable("plc$VB0$1").unwrap();
    device.poke("VB0", &[1]).unwrap();

    tokio::time::sleep(Duration::from_millis(4500)).await;
    device.poke("VB0", &[2]).unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;

    let entries = queue.drain();
    let values: Vec<u8> = named(&entries, "plc$VB0$1")
        .iter()
        .map(|e| e.data[0])
        .collect();
    assert_eq!(values, vec![1, 2]);
    service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_unsmoothed_forwards_every_poll() {
    let (service, _device, queue) = service(config().with_smoothing(false));
    service.register_variable("plc$VB0$1").unwrap();

    tokio::time::sleep(Duration::from_millis(3500)).await;
    let entries = queue.drain();
    assert_eq!(named(&entries, "plc$VB0$1").len(), 4);
    service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_registration_polls_once() {
    let (service, device, _queue) = service(config());
    assert!(service.register_variable("plc$VW0$1").unwrap());
    assert!(!service.register_variable("plc$VW0$1").unwrap());

    tokio::time::sleep(Duration::from_millis(500)).await;
    let reads: Vec<TransportCall> = device.calls().into_iter().filter(|c| c.is_read()).collect();
    assert_eq!(reads, vec![TransportCall::ReadMulti(vec!["VW0".into()])]);
    service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_health_follows_link_state() {
    let (service, device, queue) = service(config());
    device.refuse_connections(true);
    service.register_variable("plc$VW0$1").unwrap();

    tokio::time::sleep(Duration::from_secs(7)).await;
    device.refuse_connections(false);
    tokio::time::sleep(Duration::from_secs(5)).await;

    let entries = queue.drain();
    let health: Vec<u8> = named(&entries, "plc.connectionError")
        .iter()
        .map(|e| e.data[0])
        .collect();
    assert_eq!(health, vec![1, 0]);
    assert!(!named(&entries, "plc$VW0$1").is_empty());
    service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_interrupts_reconnect_backoff() {
    let (service, device, _queue) = service(config());
    device.refuse_connections(true);
    service.register_variable("plc$VW0$1").unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    tokio::time::timeout(Duration::from_millis(100), service.stop())
        .await
        .expect("stop waited for the backoff");
    assert_eq!(service.device_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_last_unregistration_stops_worker() {
    let (service, device, _queue) = service(config());
    service.register_variable("plc$VW0$1").unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(service.unregister_variable("plc$VW0$1").unwrap());
    assert_eq!(service.device_count(), 0);
    service.stop().await;
    assert_eq!(device.calls().last(), Some(&TransportCall::Close));
}

#[tokio::test(start_paused = true)]
async fn test_devices_are_independent() {
    let first = MemoryTransport::new();
    let second = MemoryTransport::new();
    second.refuse_connections(true);
    let queue = Arc::new(ResultQueue::new());
    let (a, b) = (first.clone(), second.clone());
    let toggle = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let service = S7Service::new(config().with_smoothing(false), queue.clone(), move || {
        if toggle.fetch_xor(true, std::sync::atomic::Ordering::SeqCst) {
            b.clone()
        } else {
            a.clone()
        }
    });

    service.register_variable("good$VW0$1").unwrap();
    service.register_variable("bad$VW0$1").unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;

    let entries = queue.drain();
    assert_eq!(named(&entries, "good$VW0$1").len(), 3);
    assert!(named(&entries, "bad$VW0$1").is_empty());
    assert_eq!(service.devices(), vec!["bad".to_string(), "good".to_string()]);
    service.stop().await;
}
