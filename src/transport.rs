//! Reliable transport
//!
//! Owns the physical link to one matched device and hides its lifecycle
//! behind two bounded channels of events:
//!
//! - **send channel** ([`TransportSender`]): callers enqueue events, the link
//!   task encodes and writes them whenever a connection is open. While
//!   disconnected, events wait in the queue; a full queue drops the new event
//!   with a warning.
//! - **receive channel**: the link task decodes inbound bytes and publishes
//!   every event. A full channel drops the new event with a warning so the
//!   reader never stalls.
//!
//! Any I/O error or EOF closes the connection and re-enters discovery with a
//! capped backoff. Nothing here is fatal to the process; callers only see a
//! dropped event or a reconnect gap.

pub mod discovery;
pub mod serial;

use bytes::BytesMut;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, WriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::protocol::{format_hex, Event, EventCodec, FrameMode};

pub use discovery::{
    BoxedConnection, Connection, Connector, DeviceDescriptor, DeviceFilter, DeviceMatcher,
};
pub use serial::SerialConnector;

/// Transport failures. All of them are contained inside the transport or
/// surface as a rejected enqueue; none of them ends the process.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection lost: {0}")]
    ConnectionLost(#[source] io::Error),

    #[error("no matching device found")]
    DeviceNotFound,

    #[error("{channel} channel full, event dropped")]
    ChannelSaturated { channel: &'static str },

    #[error("transport closed")]
    Closed,

    #[error("device discovery failed: {0}")]
    Discovery(String),

    #[error("failed to open {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: tokio_serial::Error,
    },
}

/// Link tuning
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Queued outbound events (also the buffer used while disconnected)
    pub outbound_capacity: usize,
    pub inbound_capacity: usize,
    /// Framing of bytes read from the device
    pub inbound_mode: FrameMode,
    /// Framing of bytes written to the device
    pub outbound_mode: FrameMode,
    /// Base delay between discovery attempts
    pub discovery_interval: Duration,
    /// Cap of the discovery backoff
    pub max_backoff: Duration,
    /// Delay before retrying a failed read in place
    pub read_retry_delay: Duration,
    /// Consecutive read errors that force a reconnect
    pub max_consecutive_errors: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 100,
            inbound_capacity: 100,
            inbound_mode: FrameMode::Fixed,
            outbound_mode: FrameMode::Fixed,
            discovery_interval: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
            read_retry_delay: Duration::from_millis(100),
            max_consecutive_errors: 10,
        }
    }
}

impl TransportConfig {
    /// Delay before discovery attempt `attempt` (1-based), doubling up to the cap
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.discovery_interval
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

/// Current state of the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    Searching { attempt: u32 },
    Connected { port: String },
    Closed,
}

/// Counters shared between the link task and its handles
#[derive(Debug, Default)]
pub struct TransportStats {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    invalid_frames: AtomicU64,
    inbound_dropped: AtomicU64,
    outbound_dropped: AtomicU64,
    connections: AtomicU64,
}

impl TransportStats {
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    pub fn invalid_frames(&self) -> u64 {
        self.invalid_frames.load(Ordering::Relaxed)
    }

    pub fn inbound_dropped(&self) -> u64 {
        self.inbound_dropped.load(Ordering::Relaxed)
    }

    pub fn outbound_dropped(&self) -> u64 {
        self.outbound_dropped.load(Ordering::Relaxed)
    }

    /// Number of connections opened so far
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }
}

/// Producer side of the send channel
#[derive(Clone)]
pub struct TransportSender {
    tx: mpsc::Sender<Event>,
    stats: Arc<TransportStats>,
}

impl TransportSender {
    /// Enqueue an event without waiting
    ///
    /// Fails with `ChannelSaturated` when the queue is full (the event is
    /// dropped) and with `Closed` once the transport has shut down.
    pub fn send(&self, event: Event) -> Result<(), TransportError> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.stats.outbound_dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Send channel full, dropping event: {}", event);
                Err(TransportError::ChannelSaturated { channel: "send" })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Handle to a running link task
pub struct Transport {
    sender: TransportSender,
    receiver: Option<mpsc::Receiver<Event>>,
    status_rx: watch::Receiver<LinkStatus>,
    stats: Arc<TransportStats>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Transport {
    /// Spawn the link task on the current runtime
    pub fn spawn(
        connector: Arc<dyn Connector>,
        matcher: DeviceMatcher,
        config: TransportConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (out_tx, out_rx) = mpsc::channel(config.outbound_capacity.max(1));
        let (in_tx, in_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let (status_tx, status_rx) = watch::channel(LinkStatus::Disconnected);
        let stats = Arc::new(TransportStats::default());

        let link = Link {
            connector,
            matcher,
            codec: EventCodec::new(config.inbound_mode),
            config,
            outbound: out_rx,
            outbound_open: true,
            inbound: in_tx,
            status: status_tx,
            stats: Arc::clone(&stats),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(link.run());

        Self {
            sender: TransportSender {
                tx: out_tx,
                stats: Arc::clone(&stats),
            },
            receiver: Some(in_rx),
            status_rx,
            stats,
            cancel,
            task: Some(task),
        }
    }

    /// Send side of the link
    pub fn send_channel(&self) -> TransportSender {
        self.sender.clone()
    }

    /// Receive side of the link; only the first call gets it
    pub fn receive_channel(&mut self) -> Option<mpsc::Receiver<Event>> {
        self.receiver.take()
    }

    pub fn status(&self) -> LinkStatus {
        self.status_rx.borrow().clone()
    }

    /// Watch link status changes
    pub fn subscribe_status(&self) -> watch::Receiver<LinkStatus> {
        self.status_rx.clone()
    }

    pub fn stats(&self) -> Arc<TransportStats> {
        Arc::clone(&self.stats)
    }

    /// Stop discovery, drop any open connection and close both channels
    ///
    /// Safe to call more than once.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Transport task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Why a connected session ended
enum SessionEnd {
    Lost(io::Error),
    Shutdown,
}

/// State owned by the link task
struct Link {
    connector: Arc<dyn Connector>,
    matcher: DeviceMatcher,
    codec: EventCodec,
    config: TransportConfig,
    outbound: mpsc::Receiver<Event>,
    outbound_open: bool,
    inbound: mpsc::Sender<Event>,
    status: watch::Sender<LinkStatus>,
    stats: Arc<TransportStats>,
    cancel: CancellationToken,
}

impl Link {
    async fn run(mut self) {
        let mut attempt: u32 = 0;

        while !self.cancel.is_cancelled() {
            let opened = tokio::select! {
                _ = self.cancel.cancelled() => break,
                res = self.find_and_open() => res,
            };

            match opened {
                Ok((conn, device)) => {
                    attempt = 0;
                    self.stats.connections.fetch_add(1, Ordering::Relaxed);
                    self.status.send_replace(LinkStatus::Connected {
                        port: device.port_name.clone(),
                    });
                    info!("🔌 Connected to {}", device);

                    match self.run_session(conn).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(e) => {
                            warn!("🔌 Connection to {} lost: {}", device.port_name, e);
                            self.status.send_replace(LinkStatus::Disconnected);
                        }
                    }

                    // Let a vanishing device settle before searching again
                    if !self.pause(self.config.discovery_interval).await {
                        break;
                    }
                }
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    let delay = self.config.backoff(attempt);
                    self.status.send_replace(LinkStatus::Searching { attempt });
                    debug!("⏳ Discovery #{} failed ({}), retrying in {:?}", attempt, e, delay);
                    if !self.pause(delay).await {
                        break;
                    }
                }
            }
        }

        self.status.send_replace(LinkStatus::Closed);
        info!("Transport closed");
        // Dropping self closes both channels
    }

    /// Sleep unless cancelled first; returns false on cancellation
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn find_and_open(&self) -> Result<(BoxedConnection, DeviceDescriptor), TransportError> {
        let devices = self.connector.discover().await?;
        trace!("Discovered {} device(s)", devices.len());

        let device = devices
            .into_iter()
            .find(|d| (self.matcher)(d))
            .ok_or(TransportError::DeviceNotFound)?;

        let conn = self.connector.open(&device).await?;
        Ok((conn, device))
    }

    async fn run_session(&mut self, conn: BoxedConnection) -> SessionEnd {
        let (mut reader, mut writer) = tokio::io::split(conn);
        let mut pending = BytesMut::with_capacity(64);
        let mut read_buf = [0u8; 64];
        let mut consecutive_errors: u32 = 0;

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    if let Err(e) = writer.shutdown().await {
                        debug!("Error closing connection: {}", e);
                    }
                    return SessionEnd::Shutdown;
                }

                res = reader.read(&mut read_buf) => match res {
                    Ok(0) => {
                        return SessionEnd::Lost(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "EOF received",
                        ));
                    }
                    Ok(n) => {
                        consecutive_errors = 0;
                        trace!("Read {} byte(s): {}", n, format_hex(&read_buf[..n]));
                        pending.extend_from_slice(&read_buf[..n]);
                        self.publish_pending(&mut pending);
                    }
                    Err(e) => {
                        consecutive_errors += 1;
                        if consecutive_errors >= self.config.max_consecutive_errors {
                            warn!(
                                "Exceeded maximum consecutive read errors ({})",
                                self.config.max_consecutive_errors
                            );
                            return SessionEnd::Lost(e);
                        }
                        warn!("Error reading from device ({}/{}): {}",
                            consecutive_errors, self.config.max_consecutive_errors, e);
                        if !self.pause(self.config.read_retry_delay).await {
                            return SessionEnd::Shutdown;
                        }
                    }
                },

                msg = self.outbound.recv(), if self.outbound_open => match msg {
                    Some(event) => {
                        if let Err(e) = self.write_event(&mut writer, event).await {
                            return SessionEnd::Lost(e);
                        }
                    }
                    None => {
                        debug!("All senders dropped, link is receive-only");
                        self.outbound_open = false;
                    }
                },
            }
        }
    }

    fn publish_pending(&mut self, pending: &mut BytesMut) {
        let dropped_before = self.codec.dropped_frames();

        while let Some(event) = self.codec.next_event(pending) {
            self.stats.frames_received.fetch_add(1, Ordering::Relaxed);
            debug!("📥 {}", event);
            match self.inbound.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(event)) => {
                    self.stats.inbound_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!("Receive channel full, dropping event: {}", event);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    trace!("Receive channel closed, discarding event");
                }
            }
        }

        let invalid = self.codec.dropped_frames() - dropped_before;
        if invalid > 0 {
            self.stats.invalid_frames.fetch_add(invalid, Ordering::Relaxed);
            debug!("Resynchronized past {} invalid frame(s)", invalid);
        }
    }

    async fn write_event(
        &mut self,
        writer: &mut WriteHalf<BoxedConnection>,
        event: Event,
    ) -> io::Result<()> {
        let data: Vec<u8> = match self.config.outbound_mode {
            FrameMode::Fixed => event.encode().to_vec(),
            FrameMode::Delimited => event.encode_delimited().to_vec(),
        };
        writer.write_all(&data).await?;
        writer.flush().await?;
        self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
        debug!("📤 {} ({})", event, format_hex(&data));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = TransportConfig {
            discovery_interval: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
            ..Default::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(500));
        assert_eq!(config.backoff(2), Duration::from_millis(1000));
        assert_eq!(config.backoff(3), Duration::from_millis(2000));
        assert_eq!(config.backoff(5), Duration::from_secs(5));
        assert_eq!(config.backoff(u32::MAX), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_sender_reports_saturation() {
        let (tx, _rx) = mpsc::channel(1);
        let stats = Arc::new(TransportStats::default());
        let sender = TransportSender {
            tx,
            stats: Arc::clone(&stats),
        };

        assert!(sender.send(Event::set(0, 10)).is_ok());
        assert!(matches!(
            sender.send(Event::set(0, 11)),
            Err(TransportError::ChannelSaturated { .. })
        ));
        assert_eq!(stats.outbound_dropped(), 1);
    }

    #[tokio::test]
    async fn test_sender_reports_closed() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = TransportSender {
            tx,
            stats: Arc::new(TransportStats::default()),
        };
        assert!(sender.is_closed());
        assert!(matches!(sender.send(Event::set(0, 1)), Err(TransportError::Closed)));
    }
}
