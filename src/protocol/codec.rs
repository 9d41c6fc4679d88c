//! Streaming frame codec
//!
//! Turns an arbitrary byte stream into [`Event`]s. UART has no packet
//! boundaries, so reads may split or merge frames and bytes may be lost or
//! corrupted. The codec never gives up on a stream: invalid frames are
//! dropped and counted.
//!
//! - **Fixed mode**: look at the leading [`FRAME_LEN`] bytes; on failure drop
//!   exactly one byte and retry.
//! - **Delimited mode**: accumulate until [`DELIMITER`], decode the
//!   [`FRAME_LEN`] bytes right before it, then discard everything up to and
//!   including the delimiter regardless of the outcome.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::io;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use super::{Event, DELIMITED_FRAME_LEN, DELIMITER, FRAME_LEN};

/// Pending bytes tolerated in delimited mode without seeing a delimiter
const MAX_PENDING: usize = 64;

/// Framing used on one direction of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameMode {
    /// Bare 5-byte frames
    #[default]
    Fixed,
    /// 5-byte frames followed by the delimiter byte
    Delimited,
}

impl FrameMode {
    /// Encoded size of one frame in this mode
    pub fn frame_len(self) -> usize {
        match self {
            FrameMode::Fixed => FRAME_LEN,
            FrameMode::Delimited => DELIMITED_FRAME_LEN,
        }
    }
}

/// Incremental event decoder / encoder
#[derive(Debug, Clone)]
pub struct EventCodec {
    mode: FrameMode,
    dropped: u64,
}

impl EventCodec {
    pub fn new(mode: FrameMode) -> Self {
        Self { mode, dropped: 0 }
    }

    pub fn fixed() -> Self {
        Self::new(FrameMode::Fixed)
    }

    pub fn delimited() -> Self {
        Self::new(FrameMode::Delimited)
    }

    pub fn mode(&self) -> FrameMode {
        self.mode
    }

    /// Number of invalid frames dropped since creation
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    /// Lazily decode every complete event currently held in `buf`
    ///
    /// Stops when the buffer holds no further complete frame; feeding more
    /// bytes into `buf` and calling again resumes where it left off.
    pub fn events<'a>(&'a mut self, buf: &'a mut BytesMut) -> impl Iterator<Item = Event> + 'a {
        std::iter::from_fn(move || self.next_event(buf))
    }

    /// Decode the next event, consuming its bytes and any garbage before it
    pub fn next_event(&mut self, buf: &mut BytesMut) -> Option<Event> {
        match self.mode {
            FrameMode::Fixed => self.next_fixed(buf),
            FrameMode::Delimited => self.next_delimited(buf),
        }
    }

    fn next_fixed(&mut self, buf: &mut BytesMut) -> Option<Event> {
        while buf.len() >= FRAME_LEN {
            // A delimiter between frames is framing, not corruption
            if buf[0] == DELIMITER {
                buf.advance(1);
                continue;
            }
            match Event::decode(&buf[..FRAME_LEN]) {
                Ok(event) => {
                    buf.advance(FRAME_LEN);
                    return Some(event);
                }
                Err(e) => {
                    trace!("Invalid frame ({}), shifting buffer by 1 byte", e);
                    self.dropped += 1;
                    buf.advance(1);
                }
            }
        }
        None
    }

    fn next_delimited(&mut self, buf: &mut BytesMut) -> Option<Event> {
        loop {
            let Some(pos) = buf.iter().position(|&b| b == DELIMITER) else {
                if buf.len() > MAX_PENDING {
                    trace!("No delimiter in {} bytes, discarding", buf.len());
                    self.dropped += 1;
                    buf.clear();
                }
                return None;
            };

            let frame = buf.split_to(pos + 1);
            // Only the FRAME_LEN bytes right before the delimiter form the frame
            let start = pos.saturating_sub(FRAME_LEN);
            if start > 0 {
                trace!("Discarding {} noise byte(s) before frame", start);
                self.dropped += 1;
            }
            match Event::decode(&frame[start..pos]) {
                Ok(event) => return Some(event),
                Err(e) => {
                    trace!("Invalid delimited frame ({}), discarding", e);
                    self.dropped += 1;
                }
            }
        }
    }
}

impl Default for EventCodec {
    fn default() -> Self {
        Self::fixed()
    }
}

impl Decoder for EventCodec {
    type Item = Event;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Event>, io::Error> {
        Ok(self.next_event(src))
    }
}

impl Encoder<Event> for EventCodec {
    type Error = io::Error;

    fn encode(&mut self, event: Event, dst: &mut BytesMut) -> Result<(), io::Error> {
        dst.reserve(self.mode.frame_len());
        dst.put_slice(&event.encode());
        if self.mode == FrameMode::Delimited {
            dst.put_u8(DELIMITER);
        }
        Ok(())
    }
}
