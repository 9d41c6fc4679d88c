//! Device panel loop
//!
//! Runs on the encoder side of the link: polls every combo, writes each
//! produced event as a delimiter-terminated frame, and applies `SET`
//! overrides from the host, answering each with an `ACK`.

use anyhow::{Context, Result};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::encoder::{ComboEncoder, SampleSource};
use crate::protocol::{Event, EventCodec, EventType};

/// Sleep between polls when no combo produced an event
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(3);

/// Default combo labels, by id
pub const DEFAULT_NAMES: [&str; 5] = ["Game", "Chat", "Media", "Aux", "Speak"];

/// Rendering failure reported by a display
#[derive(Debug, Error)]
#[error("display for combo {combo} failed: {reason}")]
pub struct DisplayError {
    pub combo: u8,
    pub reason: String,
}

/// Renders one combo's name and volume (OLED on real hardware)
pub trait ComboDisplay: Send {
    fn render(&mut self, combo: u8, name: &str, state: u8) -> Result<(), DisplayError>;
}

/// Display that only logs, for headless panels
#[derive(Debug, Default)]
pub struct NullDisplay;

impl ComboDisplay for NullDisplay {
    fn render(&mut self, combo: u8, name: &str, state: u8) -> Result<(), DisplayError> {
        debug!("Render {} ({}) at {}%", name, combo, state);
        Ok(())
    }
}

/// One physical combo: engine, hardware source and label
pub struct ComboSlot {
    pub encoder: ComboEncoder,
    pub source: Box<dyn SampleSource>,
    pub name: String,
}

impl ComboSlot {
    pub fn new(encoder: ComboEncoder, source: Box<dyn SampleSource>, name: impl Into<String>) -> Self {
        Self {
            encoder,
            source,
            name: name.into(),
        }
    }
}

/// The encoder-side half of the link
pub struct Panel<D> {
    slots: Vec<ComboSlot>,
    display: D,
    idle_interval: Duration,
}

impl<D: ComboDisplay> Panel<D> {
    pub fn new(slots: Vec<ComboSlot>, display: D) -> Self {
        Self {
            slots,
            display,
            idle_interval: IDLE_POLL_INTERVAL,
        }
    }

    pub fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    pub fn slots(&self) -> &[ComboSlot] {
        &self.slots
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    /// Run until cancelled or the host side closes
    ///
    /// Returns the panel so callers can inspect the final combo states.
    pub async fn run<R, W>(mut self, reader: R, mut writer: W, cancel: CancellationToken) -> Result<Self>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut inbound = FramedRead::new(reader, EventCodec::fixed());

        for index in 0..self.slots.len() {
            self.draw(index);
        }
        info!("Panel running with {} combo(s)", self.slots.len());

        let mut idle = false;
        loop {
            let delay = if idle { self.idle_interval } else { Duration::ZERO };

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Panel shutting down");
                    break;
                }

                frame = inbound.next() => match frame {
                    Some(Ok(event)) => self.handle_host_event(event, &mut writer).await?,
                    Some(Err(e)) => warn!("Error reading from host: {}", e),
                    None => {
                        info!("Host closed the link");
                        break;
                    }
                },

                _ = tokio::time::sleep(delay) => {
                    idle = !self.poll_all(&mut writer).await?;
                }
            }
        }

        Ok(self)
    }

    /// Poll every combo once; returns whether any event was produced
    async fn poll_all<W: AsyncWrite + Unpin>(&mut self, writer: &mut W) -> Result<bool> {
        let mut updated = false;

        for index in 0..self.slots.len() {
            let slot = &mut self.slots[index];
            let event = match slot.encoder.update(slot.source.as_mut()) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Skipping combo {} this tick: {}", slot.encoder.id(), e);
                    continue;
                }
            };

            updated = true;
            self.draw(index);
            write_frame(writer, event).await?;
        }

        Ok(updated)
    }

    async fn handle_host_event<W: AsyncWrite + Unpin>(&mut self, event: Event, writer: &mut W) -> Result<()> {
        match event.kind {
            EventType::Set => {
                let Some(index) = self.slot_index(event.combo) else {
                    warn!("Invalid combo id in SET event: {}", event.combo);
                    return Ok(());
                };
                if self.slots[index].encoder.set_state(event.state) {
                    self.draw(index);
                }
                let state = self.slots[index].encoder.state();
                write_frame(writer, Event::ack(event.combo, state)).await?;
            }
            EventType::Ack => {
                debug!("Received ACK for combo {} with state {}", event.combo, event.state);
            }
            _ => {
                debug!("Received non-SET event: {}", event);
            }
        }
        Ok(())
    }

    fn slot_index(&self, combo: u8) -> Option<usize> {
        self.slots.iter().position(|s| s.encoder.id() == combo)
    }

    fn draw(&mut self, index: usize) {
        let slot = &self.slots[index];
        if let Err(e) = self
            .display
            .render(slot.encoder.id(), &slot.name, slot.encoder.state())
        {
            warn!("{}", e);
        }
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, event: Event) -> Result<()> {
    writer
        .write_all(&event.encode_delimited())
        .await
        .context("Failed to write frame to host")?;
    writer.flush().await.context("Failed to flush frame to host")?;
    debug!("📤 {}", event);
    Ok(())
}
