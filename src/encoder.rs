//! Encoder state engine
//!
//! One [`ComboEncoder`] per physical combo. Each polling tick consumes a raw
//! `(count, button)` sample and yields at most one [`Event`]:
//!
//! - `Click` resets the volume to 0 and emits `CLICK`, skipping rotation.
//! - `DoubleClick` emits `DOUBLE_CLICK` without touching the volume.
//! - Otherwise the count delta since the last rotation is turned into a
//!   `CW`/`CCW` event, accelerated by [`Accelerator`] and clamped to [0,100].
//!
//! The engine does not debounce buttons; that is the driver's job.

pub mod acceleration;

use rand::Rng;
use std::fmt;
use std::time::Instant;
use thiserror::Error;

use crate::protocol::{clamp_state, Event, EventType, MAX_STATE};

pub use acceleration::{Accelerator, ACCEL_WINDOW, MAX_STEP, MIN_STEP, STEP_INCREASE};

/// Raw button / rotation state reported by the encoder hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ButtonState {
    #[default]
    Idle = 0x00,
    Click = 0x01,
    DoubleClick = 0x02,
    LongPress = 0x03,
    LongRelease = 0x04,
    RotatingCcw = 0x05,
    RotatingCw = 0x06,
}

impl ButtonState {
    /// Parse the status byte read from the encoder
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(ButtonState::Idle),
            0x01 => Some(ButtonState::Click),
            0x02 => Some(ButtonState::DoubleClick),
            0x03 => Some(ButtonState::LongPress),
            0x04 => Some(ButtonState::LongRelease),
            0x05 => Some(ButtonState::RotatingCcw),
            0x06 => Some(ButtonState::RotatingCw),
            _ => None,
        }
    }
}

impl fmt::Display for ButtonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ButtonState::Idle => "Idle",
            ButtonState::Click => "Click",
            ButtonState::DoubleClick => "Double Click",
            ButtonState::LongPress => "Long Press",
            ButtonState::LongRelease => "Long Release",
            ButtonState::RotatingCcw => "Counter Clockwise",
            ButtonState::RotatingCw => "Clockwise",
        };
        f.write_str(name)
    }
}

/// One reading from the encoder hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawSample {
    /// Free-running rotation counter
    pub count: i32,
    pub button: ButtonState,
}

impl RawSample {
    pub fn new(count: i32, button: ButtonState) -> Self {
        Self { count, button }
    }
}

/// Hardware read failure
#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("encoder {combo} read failed: {reason}")]
    Read { combo: u8, reason: String },

    #[error("encoder {combo} returned unknown status byte {byte:#04X}")]
    UnknownStatus { combo: u8, byte: u8 },
}

/// Source of raw samples for one combo (I2C register poll on real hardware)
pub trait SampleSource: Send {
    fn sample(&mut self) -> Result<RawSample, EncoderError>;
}

/// Per-combo state engine
#[derive(Debug, Clone)]
pub struct ComboEncoder {
    id: u8,
    state: u8,
    last_count: i32,
    last_rotation: Option<Instant>,
    accel: Accelerator,
}

impl ComboEncoder {
    /// Create an engine with a known starting volume
    pub fn new(id: u8, initial_state: u8) -> Self {
        Self {
            id,
            state: initial_state.min(MAX_STATE),
            last_count: 0,
            last_rotation: None,
            accel: Accelerator::new(),
        }
    }

    /// Create an engine with a random starting volume, until the host syncs it
    pub fn with_random_state(id: u8) -> Self {
        Self::new(id, rand::thread_rng().gen_range(0..=MAX_STATE))
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    /// Current volume (0-100)
    pub fn state(&self) -> u8 {
        self.state
    }

    /// Current fractional acceleration step
    pub fn exact_step(&self) -> f64 {
        self.accel.exact_step()
    }

    /// Override the volume, e.g. after a host `SET`
    ///
    /// Returns whether the value changed so callers can skip redundant redraws.
    pub fn set_state(&mut self, state: u8) -> bool {
        let state = state.min(MAX_STATE);
        if state == self.state {
            return false;
        }
        self.state = state;
        true
    }

    /// Poll the source and advance one tick
    pub fn update<S>(&mut self, source: &mut S) -> Result<Option<Event>, EncoderError>
    where
        S: SampleSource + ?Sized,
    {
        let sample = source.sample()?;
        Ok(self.apply(sample, Instant::now()))
    }

    /// Advance one tick with a sample taken at `now`
    pub fn apply(&mut self, sample: RawSample, now: Instant) -> Option<Event> {
        match sample.button {
            ButtonState::Click => {
                self.state = 0;
                return Some(Event::new(EventType::Click, self.id, self.state));
            }
            ButtonState::DoubleClick => {
                return Some(Event::new(EventType::DoubleClick, self.id, self.state));
            }
            _ => {}
        }

        let delta = sample.count.wrapping_sub(self.last_count);
        if delta == 0 {
            return None;
        }

        let elapsed = self
            .last_rotation
            .map(|last| now.saturating_duration_since(last));
        self.last_rotation = Some(now);
        self.last_count = sample.count;

        let step = self.accel.next_step(elapsed);
        let kind = if delta > 0 {
            EventType::Cw
        } else {
            EventType::Ccw
        };
        let signed_step = if delta > 0 { step } else { -step };

        self.state = clamp_state(self.state as i32 + signed_step);
        Some(Event::clamped(kind, self.id, self.state as i32))
    }
}
