//! Network transport layer
//!
//! [`S7Transport`] is the seam between the poll engine and a device. Two
//! implementations ship with the crate:
//!
//! - [`TcpTransport`]: ISO-on-TCP (RFC 1006) with COTP connect, PDU size
//!   negotiation and read/write var jobs.
//! - [`MemoryTransport`]: a simulated device backed by in-process memory areas,
//!   with a call log and failure injection. Used by the integration tests and
//!   by `s7poll --simulate`.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::address::{Area, S7Address, WordLen};
use crate::codec::S7Codec;
use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_REQUEST_TIMEOUT_MS, ISO_TCP_PORT, MAX_PDU_SIZE, PDU_SIZE,
    RC_ADDRESS_OUT_OF_RANGE, S7_RESPONSE_BUFFER_SIZE, TPKT_HEADER_LEN,
};
use crate::error::{S7Error, S7Result};
use crate::item::{ItemStatus, WireItem};
use crate::pdu::{PduBuilder, S7Pdu};

/// Job + item header bytes a single-item read spends outside the data
const AREA_READ_OVERHEAD: usize = 18;

/// Job + item header bytes a single-item write spends outside the data
const AREA_WRITE_OVERHEAD: usize = 28;

// ============================================================================
// Endpoint & statistics
// ============================================================================

/// Where and how to reach a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Device identity: an IP/hostname, or `host:port`
    pub host: String,
    pub port: u16,
    pub local_tsap: u16,
    pub remote_tsap: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, local_tsap: u16, remote_tsap: u16) -> Self {
        Self {
            host: host.into(),
            port: ISO_TCP_PORT,
            local_tsap,
            remote_tsap,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Address passed to the socket layer
    pub fn socket_address(&self) -> String {
        match self.host.parse::<SocketAddr>() {
            Ok(addr) => addr.to_string(),
            Err(_) => format!("{}:{}", self.host, self.port),
        }
    }
}

/// Transport statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

// ============================================================================
// Transport trait
// ============================================================================

/// Operations the engine needs from a device link.
///
/// Multi-var calls return `Err` only when the exchange as a whole failed;
/// per-item outcomes are recorded in each [`WireItem::status`].
pub trait S7Transport: Send {
    /// Open the link; any previous link is closed first
    fn connect(&mut self, endpoint: &Endpoint) -> impl Future<Output = S7Result<()>> + Send;

    fn close(&mut self) -> impl Future<Output = S7Result<()>> + Send;

    fn is_connected(&self) -> bool;

    /// PDU size granted at connect time
    fn pdu_size(&self) -> usize;

    fn read_multi_vars(
        &mut self,
        items: &mut [WireItem],
    ) -> impl Future<Output = S7Result<()>> + Send;

    fn write_multi_vars(
        &mut self,
        items: &mut [WireItem],
    ) -> impl Future<Output = S7Result<()>> + Send;

    /// Read one item of any size, fragmenting as needed
    fn read_area(&mut self, item: &mut WireItem) -> impl Future<Output = S7Result<()>> + Send;

    /// Write one item of any size, fragmenting as needed
    fn write_area(&mut self, item: &mut WireItem) -> impl Future<Output = S7Result<()>> + Send;

    fn get_stats(&self) -> TransportStats;
}

/// Elements per fragment when an item does not fit one PDU
fn fragment_elements(pdu_size: usize, overhead: usize, element_size: usize) -> usize {
    (pdu_size.saturating_sub(overhead) / element_size).max(1)
}

// ============================================================================
// TCP transport
// ============================================================================

/// ISO-on-TCP transport
pub struct TcpTransport {
    stream: Option<TcpStream>,
    connect_timeout: Duration,
    request_timeout: Duration,
    requested_pdu: u16,
    pdu_size: usize,
    pdu_ref: u16,
    stats: TransportStats,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        )
    }
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            stream: None,
            connect_timeout,
            request_timeout,
            requested_pdu: PDU_SIZE as u16,
            pdu_size: PDU_SIZE,
            pdu_ref: 0,
            stats: TransportStats::default(),
        }
    }

    /// PDU size requested during setup (capped by the device's answer)
    pub fn with_requested_pdu(mut self, pdu_size: u16) -> Self {
        self.requested_pdu = pdu_size.min(MAX_PDU_SIZE as u16);
        self
    }

    fn next_ref(&mut self) -> u16 {
        self.pdu_ref = self.pdu_ref.wrapping_add(1);
        self.pdu_ref
    }

    async fn read_frame(stream: &mut TcpStream) -> S7Result<BytesMut> {
        let mut header = [0u8; TPKT_HEADER_LEN];
        stream.read_exact(&mut header).await?;
        let total = S7Codec::tpkt_length(&header)?;
        if total > S7_RESPONSE_BUFFER_SIZE {
            return Err(S7Error::protocol(format!("Frame of {} bytes too large", total)));
        }
        let mut frame = BytesMut::zeroed(total);
        frame[..TPKT_HEADER_LEN].copy_from_slice(&header);
        stream.read_exact(&mut frame[TPKT_HEADER_LEN..]).await?;
        Ok(frame)
    }

    async fn send_and_receive(stream: &mut TcpStream, frame: &[u8]) -> S7Result<BytesMut> {
        stream.write_all(frame).await?;
        Self::read_frame(stream).await
    }

    /// Send one job and wait for its acknowledgement
    async fn exchange(&mut self, pdu: S7Pdu) -> S7Result<S7Pdu> {
        let frame = S7Codec::encode_frame(&pdu);
        let request_timeout = self.request_timeout;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| S7Error::connection("Not connected"))?;

        self.stats.requests_sent += 1;
        self.stats.bytes_sent += frame.len() as u64;

        let result = match timeout(request_timeout, Self::send_and_receive(stream, &frame)).await {
            Ok(result) => result,
            Err(_) => {
                self.stats.timeouts += 1;
                Err(S7Error::timeout(
                    "exchange",
                    request_timeout.as_millis() as u64,
                ))
            }
        };

        match result {
            Ok(response) => {
                self.stats.responses_received += 1;
                self.stats.bytes_received += response.len() as u64;
                let ack = S7Codec::decode_frame(&response)?;
                if ack.pdu_ref() != pdu.pdu_ref() {
                    return Err(S7Error::protocol(format!(
                        "PDU reference mismatch: sent {}, got {}",
                        pdu.pdu_ref(),
                        ack.pdu_ref()
                    )));
                }
                Ok(ack)
            }
            Err(e) => {
                self.stats.errors += 1;
                if e.is_connection_error() {
                    // the stream position is unknown after a timeout or socket error
                    self.stream = None;
                }
                Err(e)
            }
        }
    }
}

impl S7Transport for TcpTransport {
    async fn connect(&mut self, endpoint: &Endpoint) -> S7Result<()> {
        self.stream = None;
        let address = endpoint.socket_address();
        let connect_ms = self.connect_timeout.as_millis() as u64;

        let mut stream = timeout(self.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| S7Error::timeout(format!("connect to {}", address), connect_ms))?
            .map_err(|e| S7Error::connection(format!("{}: {}", address, e)))?;
        stream.set_nodelay(true)?;

        let request = S7Codec::connection_request(endpoint.local_tsap, endpoint.remote_tsap);
        let confirm = timeout(
            self.connect_timeout,
            Self::send_and_receive(&mut stream, &request),
        )
        .await
        .map_err(|_| S7Error::timeout("COTP connect", connect_ms))??;
        S7Codec::parse_connection_confirm(&confirm)?;

        self.stream = Some(stream);
        let pdu_ref = self.next_ref();
        let setup = PduBuilder::build_setup_communication(pdu_ref, self.requested_pdu)?;
        let ack = match self.exchange(setup).await {
            Ok(ack) => ack,
            Err(e) => {
                self.stream = None;
                return Err(e);
            }
        };
        let granted = S7Codec::parse_setup_response(&ack)? as usize;
        self.pdu_size = granted.clamp(1, MAX_PDU_SIZE);

        info!(
            "Connected to {} (TSAP {:04X}/{:04X}, PDU {})",
            address, endpoint.local_tsap, endpoint.remote_tsap, self.pdu_size
        );
        Ok(())
    }

    async fn close(&mut self) -> S7Result<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Socket shutdown failed: {}", e);
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn pdu_size(&self) -> usize {
        self.pdu_size
    }

    async fn read_multi_vars(&mut self, items: &mut [WireItem]) -> S7Result<()> {
        let addresses: Vec<S7Address> = items.iter().map(|i| i.address).collect();
        let pdu_ref = self.next_ref();
        let request = PduBuilder::build_read_var(pdu_ref, &addresses)?;
        let ack = self.exchange(request).await?;
        S7Codec::parse_read_response(&ack, items)
    }

    async fn write_multi_vars(&mut self, items: &mut [WireItem]) -> S7Result<()> {
        let pdu_ref = self.next_ref();
        let request = {
            let payloads: Vec<(S7Address, &[u8])> =
                items.iter().map(|i| (i.address, &i.data[..])).collect();
            PduBuilder::build_write_var(pdu_ref, &payloads)?
        };
        let ack = self.exchange(request).await?;
        S7Codec::parse_write_response(&ack, items)
    }

    async fn read_area(&mut self, item: &mut WireItem) -> S7Result<()> {
        let element_size = item.address.element_size();
        let per_fragment = fragment_elements(self.pdu_size, AREA_READ_OVERHEAD, element_size);
        let total = item.address.count as usize;
        let mut done = 0;
        item.status = ItemStatus::Ok;

        while done < total {
            let chunk = per_fragment.min(total - done);
            let address = item.address.window(done as u32, chunk as u16);
            let mut part = [WireItem::for_read(item.name.clone(), address)];
            self.read_multi_vars(&mut part).await?;
            let [part] = part;
            if !part.is_ok() {
                item.status = part.status;
                return Ok(());
            }
            let offset = done * element_size;
            item.data[offset..offset + part.data.len()].copy_from_slice(&part.data);
            done += chunk;
        }
        Ok(())
    }

    async fn write_area(&mut self, item: &mut WireItem) -> S7Result<()> {
        let element_size = item.address.element_size();
        let per_fragment = fragment_elements(self.pdu_size, AREA_WRITE_OVERHEAD, element_size);
        let total = item.address.count as usize;
        let mut done = 0;
        item.status = ItemStatus::Ok;

        while done < total {
            let chunk = per_fragment.min(total - done);
            let address = item.address.window(done as u32, chunk as u16);
            let offset = done * element_size;
            let data = BytesMut::from(&item.data[offset..offset + chunk * element_size]);
            let mut part = [WireItem::for_write(item.name.clone(), address, data)];
            self.write_multi_vars(&mut part).await?;
            if !part[0].is_ok() {
                item.status = part[0].status;
                return Ok(());
            }
            done += chunk;
        }
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats
    }
}

// ============================================================================
// Memory transport
// ============================================================================

/// One recorded transport call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Connect,
    Close,
    ReadMulti(Vec<String>),
    WriteMulti(Vec<String>),
    ReadArea(String),
    WriteArea(String),
}

impl TransportCall {
    pub fn is_read(&self) -> bool {
        matches!(self, Self::ReadMulti(_) | Self::ReadArea(_))
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Self::WriteMulti(_) | Self::WriteArea(_))
    }
}

#[derive(Debug, Default)]
struct MemoryDevice {
    areas: HashMap<(Area, u16), Vec<u8>>,
    connected: bool,
    refuse_connections: bool,
    failing_exchanges: Option<usize>,
    pdu_size: Option<usize>,
    calls: Vec<TransportCall>,
    stats: TransportStats,
}

/// Bytes an area may grow to before accesses are rejected as out of range
const MEMORY_AREA_LIMIT: usize = 64 * 1024;

impl MemoryDevice {
    fn region(&mut self, address: &S7Address) -> &mut Vec<u8> {
        self.areas
            .entry((address.area, address.wire_db_number()))
            .or_default()
    }

    fn read(&mut self, item: &mut WireItem) {
        let offset = item.address.byte_offset();
        let len = item.size();
        if offset + len > MEMORY_AREA_LIMIT {
            item.status = ItemStatus::Rejected(RC_ADDRESS_OUT_OF_RANGE);
            return;
        }
        let address = item.address;
        let region = self.region(&address);
        if region.len() < offset + len {
            region.resize(offset + len, 0);
        }
        match address.word_len {
            WordLen::Bit => {
                let bit = address.start % 8;
                item.data[0] = (region[offset] >> bit) & 1;
            }
            _ => item.data.copy_from_slice(&region[offset..offset + len]),
        }
        item.status = ItemStatus::Ok;
    }

    fn write(&mut self, item: &mut WireItem) {
        let offset = item.address.byte_offset();
        let len = item.size();
        if offset + len > MEMORY_AREA_LIMIT || item.data.len() != len {
            item.status = ItemStatus::Rejected(RC_ADDRESS_OUT_OF_RANGE);
            return;
        }
        let address = item.address;
        let region = self.region(&address);
        if region.len() < offset + len {
            region.resize(offset + len, 0);
        }
        match address.word_len {
            WordLen::Bit => {
                let mask = 1u8 << (address.start % 8);
                if item.data[0] != 0 {
                    region[offset] |= mask;
                } else {
                    region[offset] &= !mask;
                }
            }
            _ => region[offset..offset + len].copy_from_slice(&item.data),
        }
        item.status = ItemStatus::Ok;
    }

    /// Gate shared by every data exchange
    fn begin_exchange(&mut self, call: TransportCall) -> S7Result<()> {
        self.calls.push(call);
        self.stats.requests_sent += 1;
        if !self.connected {
            self.stats.errors += 1;
            return Err(S7Error::connection("Not connected"));
        }
        match self.failing_exchanges {
            Some(0) => {}
            Some(ref mut remaining) => {
                *remaining -= 1;
                self.stats.errors += 1;
                return Err(S7Error::Exchange {
                    class: 0x81,
                    code: 0x04,
                });
            }
            None => {
                self.stats.errors += 1;
                return Err(S7Error::Exchange {
                    class: 0x81,
                    code: 0x04,
                });
            }
        }
        self.stats.responses_received += 1;
        Ok(())
    }
}

/// Simulated device.
///
/// Clones share the same device, so a test can keep a handle while the engine
/// owns another.
///
/// # Example
///
/// ```rust
/// use voltage_s7::MemoryTransport;
///
/// let device = MemoryTransport::new();
/// device.poke("VW10", &[0x12, 0x34]).unwrap();
/// assert_eq!(device.peek("VB10.2").unwrap(), vec![0x12, 0x34]);
/// ```
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    inner: Arc<Mutex<MemoryDevice>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryDevice {
                failing_exchanges: Some(0),
                ..Default::default()
            })),
        }
    }

    /// Store bytes at an address
    pub fn poke(&self, address: &str, data: &[u8]) -> S7Result<()> {
        let address = S7Address::parse(address)?;
        let mut item = WireItem::for_write(address.to_string(), address, BytesMut::from(data));
        self.inner.lock().write(&mut item);
        match item.status {
            ItemStatus::Ok => Ok(()),
            _ => Err(S7Error::invalid_data(format!(
                "{} expects {} bytes",
                address,
                address.byte_size()
            ))),
        }
    }

    /// Current bytes at an address
    pub fn peek(&self, address: &str) -> S7Result<Vec<u8>> {
        let address = S7Address::parse(address)?;
        let mut item = WireItem::for_read(address.to_string(), address);
        self.inner.lock().read(&mut item);
        match item.status {
            ItemStatus::Ok => Ok(item.data.to_vec()),
            _ => Err(S7Error::invalid_data(format!("{} out of range", address))),
        }
    }

    /// Make the next `count` exchanges fail
    pub fn fail_next(&self, count: usize) {
        self.inner.lock().failing_exchanges = Some(count);
    }

    /// Make every exchange fail until switched off
    pub fn set_failing(&self, failing: bool) {
        self.inner.lock().failing_exchanges = if failing { None } else { Some(0) };
    }

    /// Refuse connection attempts
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.lock().refuse_connections = refuse;
    }

    /// Override the PDU size granted at connect
    pub fn set_pdu_size(&self, pdu_size: usize) {
        self.inner.lock().pdu_size = Some(pdu_size);
    }

    /// Simulate the device dropping the link
    pub fn drop_link(&self) {
        self.inner.lock().connected = false;
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.inner.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    /// Number of exchanges (reads and writes) attempted
    pub fn exchange_count(&self) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|c| c.is_read() || c.is_write())
            .count()
    }
}

impl S7Transport for MemoryTransport {
    async fn connect(&mut self, endpoint: &Endpoint) -> S7Result<()> {
        let mut device = self.inner.lock();
        device.calls.push(TransportCall::Connect);
        if device.refuse_connections {
            device.connected = false;
            return Err(S7Error::connection(format!(
                "{} refused the connection",
                endpoint.socket_address()
            )));
        }
        device.connected = true;
        Ok(())
    }

    async fn close(&mut self) -> S7Result<()> {
        let mut device = self.inner.lock();
        device.calls.push(TransportCall::Close);
        device.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }

    fn pdu_size(&self) -> usize {
        self.inner.lock().pdu_size.unwrap_or(PDU_SIZE)
    }

    async fn read_multi_vars(&mut self, items: &mut [WireItem]) -> S7Result<()> {
        let mut device = self.inner.lock();
        device.begin_exchange(TransportCall::ReadMulti(
            items.iter().map(|i| i.name.clone()).collect(),
        ))?;
        for item in items.iter_mut() {
            device.read(item);
        }
        Ok(())
    }

    async fn write_multi_vars(&mut self, items: &mut [WireItem]) -> S7Result<()> {
        let mut device = self.inner.lock();
        device.begin_exchange(TransportCall::WriteMulti(
            items.iter().map(|i| i.name.clone()).collect(),
        ))?;
        for item in items.iter_mut() {
            device.write(item);
        }
        Ok(())
    }

    async fn read_area(&mut self, item: &mut WireItem) -> S7Result<()> {
        let mut device = self.inner.lock();
        device.begin_exchange(TransportCall::ReadArea(item.name.clone()))?;
        device.read(item);
        Ok(())
    }

    async fn write_area(&mut self, item: &mut WireItem) -> S7Result<()> {
        let mut device = self.inner.lock();
        device.begin_exchange(TransportCall::WriteArea(item.name.clone()))?;
        device.write(item);
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.inner.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(text: &str) -> WireItem {
        WireItem::for_read(text, S7Address::parse(text).unwrap())
    }

    #[test]
    fn test_endpoint_address() {
        let ep = Endpoint::new("192.168.0.10", 0x0100, 0x0200);
        assert_eq!(ep.socket_address(), "192.168.0.10:102");
        let ep = Endpoint::new("10.0.0.1:1102", 0, 0);
        assert_eq!(ep.socket_address(), "10.0.0.1:1102");
        let ep = Endpoint::new("plc.local", 0, 0).with_port(2000);
        assert_eq!(ep.socket_address(), "plc.local:2000");
    }

    #[test]
    fn test_fragment_elements() {
        assert_eq!(fragment_elements(240, AREA_READ_OVERHEAD, 1), 222);
        assert_eq!(fragment_elements(240, AREA_WRITE_OVERHEAD, 2), 106);
        assert_eq!(fragment_elements(10, AREA_READ_OVERHEAD, 4), 1);
    }

    #[tokio::test]
    async fn test_memory_round_trip() {
        let mut device = MemoryTransport::new();
        device.connect(&Endpoint::new("sim", 0, 0)).await.unwrap();

        let address = S7Address::parse("VW4").unwrap();
        let mut writes = [WireItem::for_write("VW4", address, BytesMut::from(&[0xBE, 0xEF][..]))];
        device.write_multi_vars(&mut writes).await.unwrap();
        assert!(writes[0].is_ok());

        let mut reads = [item("VW4"), item("VB5")];
        device.read_multi_vars(&mut reads).await.unwrap();
        assert_eq!(&reads[0].data[..], &[0xBE, 0xEF]);
        assert_eq!(&reads[1].data[..], &[0xEF]);
    }

    #[tokio::test]
    async fn test_memory_bits() {
        let device = MemoryTransport::new();
        device.poke("V2.3", &[1]).unwrap();
        assert_eq!(device.peek("VB2").unwrap(), vec![0x08]);
        assert_eq!(device.peek("V2.3").unwrap(), vec![1]);
        device.poke("V2.3", &[0]).unwrap();
        assert_eq!(device.peek("VB2").unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn test_memory_requires_connection() {
        let mut device = MemoryTransport::new();
        let mut reads = [item("VW0")];
        assert!(device.read_multi_vars(&mut reads).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_failure_injection() {
        let mut device = MemoryTransport::new();
        device.connect(&Endpoint::new("sim", 0, 0)).await.unwrap();
        device.fail_next(1);

        let mut reads = [item("VW0")];
        assert!(device.read_multi_vars(&mut reads).await.is_err());
        assert!(device.read_multi_vars(&mut reads).await.is_ok());
        assert_eq!(device.exchange_count(), 2);
        assert_eq!(device.get_stats().errors, 1);
    }

    #[tokio::test]
    async fn test_memory_refuses_connections() {
        let mut device = MemoryTransport::new();
        device.refuse_connections(true);
        assert!(device.connect(&Endpoint::new("sim", 0, 0)).await.is_err());
        assert!(!device.is_connected());
    }

    #[tokio::test]
    async fn test_memory_out_of_range() {
        let mut device = MemoryTransport::new();
        device.connect(&Endpoint::new("sim", 0, 0)).await.unwrap();
        let mut reads = [item("VW70000")];
        device.read_multi_vars(&mut reads).await.unwrap();
        assert_eq!(reads[0].status, ItemStatus::Rejected(RC_ADDRESS_OUT_OF_RANGE));
    }

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        let mut transport =
            TcpTransport::new(Duration::from_millis(200), Duration::from_millis(200));
        let endpoint = Endpoint::new("127.0.0.1", 0x0100, 0x0200).with_port(1);
        assert!(transport.connect(&endpoint).await.is_err());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_tcp_exchange_requires_connection() {
        let mut transport = TcpTransport::default();
        let mut reads = [item("VW0")];
        let err = transport.read_multi_vars(&mut reads).await.unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(transport.get_stats().requests_sent, 0);
    }
}
