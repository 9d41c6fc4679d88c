//! Combo event protocol
//!
//! Wire-level event type shared by the device panel and the host, plus the
//! fixed 5-byte frame encoding: `[SIG, SIG, TYPE, COMBO, STATE]`.

pub mod codec;

use std::fmt;
use thiserror::Error;

pub use codec::{EventCodec, FrameMode};

/// Frame start marker, repeated twice at the head of every frame
pub const SIGNATURE: u8 = 0x69;

/// Out-of-band frame terminator used in delimiter mode
pub const DELIMITER: u8 = 0xF0;

/// Length of the core frame (signature + type + combo + state)
pub const FRAME_LEN: usize = 5;

/// Length of a delimiter-mode frame
pub const DELIMITED_FRAME_LEN: usize = FRAME_LEN + 1;

/// Number of physical combos in the system
pub const COMBO_COUNT: u8 = 5;

/// Upper bound of the volume state (percent)
pub const MAX_STATE: u8 = 100;

/// Event type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventType {
    // device -> host
    Cw = 1,
    Ccw = 2,
    Click = 3,
    DoubleClick = 4,

    // host -> device
    Set = 5,

    // device -> host, reply to Set
    Ack = 6,
}

impl EventType {
    /// Parse the wire type byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(EventType::Cw),
            2 => Some(EventType::Ccw),
            3 => Some(EventType::Click),
            4 => Some(EventType::DoubleClick),
            5 => Some(EventType::Set),
            6 => Some(EventType::Ack),
            _ => None,
        }
    }

    /// Wire type byte
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Whether the state byte is a volume that must lie in [0,100]
    pub fn carries_volume(self) -> bool {
        matches!(
            self,
            EventType::Cw | EventType::Ccw | EventType::Set | EventType::Ack
        )
    }

    fn label(self) -> &'static str {
        match self {
            EventType::Cw => "CW",
            EventType::Ccw => "CCW",
            EventType::Click => "Clck",
            EventType::DoubleClick => "DblClck",
            EventType::Set => "Set",
            EventType::Ack => "Ack",
        }
    }
}

/// Frame decoding failure. Every variant means the frame is invalid and
/// should be dropped, never that the stream is broken.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("invalid frame signature: {0:02X} {1:02X}")]
    Signature(u8, u8),

    #[error("unknown event type byte: {0:#04X}")]
    UnknownType(u8),
}

/// A single combo event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Event {
    pub kind: EventType,
    pub combo: u8,
    pub state: u8,
}

impl Event {
    /// Build an event from raw fields, no range checks
    pub fn new(kind: EventType, combo: u8, state: u8) -> Self {
        Self { kind, combo, state }
    }

    /// Build an event whose state is clamped into [0,100] first
    pub fn clamped(kind: EventType, combo: u8, state: i32) -> Self {
        Self::new(kind, combo, clamp_state(state))
    }

    /// Host -> device volume override
    pub fn set(combo: u8, state: u8) -> Self {
        Self::new(EventType::Set, combo, state.min(MAX_STATE))
    }

    /// Device -> host acknowledgement of a `Set`
    pub fn ack(combo: u8, state: u8) -> Self {
        Self::new(EventType::Ack, combo, state.min(MAX_STATE))
    }

    /// Encode as a core frame
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        [SIGNATURE, SIGNATURE, self.kind.to_byte(), self.combo, self.state]
    }

    /// Encode as a core frame followed by the delimiter byte
    pub fn encode_delimited(&self) -> [u8; DELIMITED_FRAME_LEN] {
        let [a, b, c, d, e] = self.encode();
        [a, b, c, d, e, DELIMITER]
    }

    /// Decode a core frame. The state byte is passed through unchecked.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() != FRAME_LEN {
            return Err(FrameError::Length {
                expected: FRAME_LEN,
                actual: data.len(),
            });
        }
        if data[0] != SIGNATURE || data[1] != SIGNATURE {
            return Err(FrameError::Signature(data[0], data[1]));
        }
        let kind = EventType::from_byte(data[2]).ok_or(FrameError::UnknownType(data[2]))?;
        Ok(Self::new(kind, data[3], data[4]))
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = self.kind.label();
        if self.state > MAX_STATE {
            write!(f, "{:<7} {} ERR", label, self.combo)
        } else {
            write!(f, "{:<7} {} {:>3}", label, self.combo, self.state)
        }
    }
}

/// Clamp an arbitrary signed volume into [0,100]
pub fn clamp_state(state: i32) -> u8 {
    state.clamp(0, MAX_STATE as i32) as u8
}

/// Format frame bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
