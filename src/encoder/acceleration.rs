//! Rotation acceleration
//!
//! Fast continuous spins grow the per-tick step additively, slow turns stay
//! at one step. The accumulator is bounded so a long spin never overshoots
//! [`MAX_STEP`], and any pause of at least [`ACCEL_WINDOW`] starts over.

use std::time::Duration;

/// Gap below which consecutive rotations count as one spin
pub const ACCEL_WINDOW: Duration = Duration::from_millis(60);

/// Added to the accumulator on every fast tick
pub const STEP_INCREASE: f64 = 0.8;

pub const MIN_STEP: i32 = 1;
pub const MAX_STEP: i32 = 8;

// Absorbs float drift so 1.0 + 5 * 0.8 floors to 5, not 4
const STEP_EPSILON: f64 = 1e-9;

/// Fractional step accumulator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Accelerator {
    exact_step: f64,
}

impl Accelerator {
    pub fn new() -> Self {
        Self {
            exact_step: MIN_STEP as f64,
        }
    }

    /// Current fractional step
    pub fn exact_step(&self) -> f64 {
        self.exact_step
    }

    /// Step for a rotation that arrived `elapsed` after the previous one.
    /// `None` means there was no previous rotation.
    pub fn next_step(&mut self, elapsed: Option<Duration>) -> i32 {
        match elapsed {
            Some(gap) if gap < ACCEL_WINDOW => {
                self.exact_step = (self.exact_step + STEP_INCREASE).min(MAX_STEP as f64);
                ((self.exact_step + STEP_EPSILON).floor() as i32).clamp(MIN_STEP, MAX_STEP)
            }
            _ => {
                self.exact_step = MIN_STEP as f64;
                MIN_STEP
            }
        }
    }
}

impl Default for Accelerator {
    fn default() -> Self {
        Self::new()
    }
}
