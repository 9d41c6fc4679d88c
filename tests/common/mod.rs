//! Shared fixtures for link tests
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::BytesMut;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::watch;

use combo_link::protocol::{Event, EventCodec};
use combo_link::transport::{
    BoxedConnection, Connector, DeviceDescriptor, LinkStatus, TransportConfig, TransportError,
};

pub const TIMEOUT: Duration = Duration::from_secs(3);

pub fn fast_config() -> TransportConfig {
    TransportConfig {
        discovery_interval: Duration::from_millis(10),
        max_backoff: Duration::from_millis(40),
        read_retry_delay: Duration::from_millis(1),
        ..Default::default()
    }
}

pub fn panel_device() -> DeviceDescriptor {
    DeviceDescriptor::new("/dev/ttyACM0")
        .with_usb_ids(0x2E8A, 0x000A)
        .with_product("Combo Panel")
}

/// Connector whose devices and connections are scripted by the test
#[derive(Default)]
pub struct MockConnector {
    devices: Mutex<Vec<DeviceDescriptor>>,
    connections: Mutex<VecDeque<BoxedConnection>>,
    discover_calls: AtomicUsize,
    open_calls: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_device(device: DeviceDescriptor) -> Arc<Self> {
        let connector = Self::new();
        connector.add_device(device);
        connector
    }

    pub fn add_device(&self, device: DeviceDescriptor) {
        self.devices.lock().push(device);
    }

    pub fn remove_devices(&self) {
        self.devices.lock().clear();
    }

    /// Queue a connection and return the peer (device) end
    pub fn plug(&self) -> DuplexStream {
        let (link_end, device_end) = tokio::io::duplex(1024);
        self.connections.lock().push_back(Box::new(link_end));
        device_end
    }

    pub fn plug_connection(&self, conn: BoxedConnection) {
        self.connections.lock().push_back(conn);
    }

    pub fn discover_calls(&self) -> usize {
        self.discover_calls.load(Ordering::SeqCst)
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn discover(&self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.devices.lock().clone())
    }

    async fn open(&self, device: &DeviceDescriptor) -> Result<BoxedConnection, TransportError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        self.connections
            .lock()
            .pop_front()
            .ok_or_else(|| TransportError::Discovery(format!("{} is busy", device.port_name)))
    }
}

/// Connection whose reads always fail and whose writes vanish
pub struct FailingConnection;

impl AsyncRead for FailingConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "framing error")))
    }
}

impl AsyncWrite for FailingConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Connection that accepts `limit` bytes, then fails every write
///
/// Reads never complete.
pub struct BrokenWriteConnection {
    written: usize,
    limit: usize,
}

impl BrokenWriteConnection {
    pub fn new(limit: usize) -> Self {
        Self { written: 0, limit }
    }
}

impl AsyncRead for BrokenWriteConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for BrokenWriteConnection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let room = self.limit.saturating_sub(self.written);
        if room == 0 {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged")));
        }
        let n = room.min(buf.len());
        self.written += n;
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Connector whose discovery never completes
pub struct StalledConnector;

#[async_trait]
impl Connector for StalledConnector {
    async fn discover(&self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        std::future::pending().await
    }

    async fn open(&self, device: &DeviceDescriptor) -> Result<BoxedConnection, TransportError> {
        Err(TransportError::Discovery(format!("{} cannot be opened", device.port_name)))
    }
}

/// Read `count` events written by the link (fixed framing)
pub async fn read_events<R: AsyncRead + Unpin>(reader: &mut R, count: usize) -> Vec<Event> {
    let mut codec = EventCodec::fixed();
    let mut pending = BytesMut::new();
    let mut events = Vec::new();
    let mut buf = [0u8; 64];
    while events.len() < count {
        let n = tokio::time::timeout(TIMEOUT, reader.read(&mut buf))
            .await
            .expect("timed out waiting for link output")
            .expect("peer read failed");
        assert!(n > 0, "link closed early");
        pending.extend_from_slice(&buf[..n]);
        events.extend(codec.events(&mut pending));
    }
    assert!(pending.is_empty(), "unexpected trailing bytes");
    events
}

/// Assert the link writes nothing more for a little while
pub async fn assert_quiet<R: AsyncRead + Unpin>(reader: &mut R) {
    let mut buf = [0u8; 16];
    match tokio::time::timeout(Duration::from_millis(100), reader.read(&mut buf)).await {
        Err(_) => {}
        Ok(Ok(0)) => {}
        Ok(res) => panic!("unexpected output from link: {:?}", res.map(|n| buf[..n].to_vec())),
    }
}

pub async fn wait_for_status<F>(status: &mut watch::Receiver<LinkStatus>, f: F) -> LinkStatus
where
    F: FnMut(&LinkStatus) -> bool,
{
    tokio::time::timeout(TIMEOUT, status.wait_for(f))
        .await
        .expect("timed out waiting for link status")
        .expect("status channel closed")
        .clone()
}

pub fn is_connected(status: &LinkStatus) -> bool {
    matches!(status, LinkStatus::Connected { .. })
}
