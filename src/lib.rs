//! Combo Link
//!
//! Event link between a panel of rotary-encoder "combo" controls and a host
//! that maps each combo to an audio device volume.
//!
//! - [`protocol`]: event frames and the resynchronizing codec
//! - [`encoder`]: per-combo state with rotation acceleration
//! - [`transport`]: auto-reconnecting serial link behind bounded channels
//! - [`device`]: panel-side polling loop
//! - [`host`], [`volume`], [`config`]: host application pieces

pub mod config;
pub mod device;
pub mod encoder;
pub mod host;
pub mod monitor;
pub mod paths;
pub mod protocol;
pub mod transport;
pub mod volume;
