//! Audio endpoint volume backends
//!
//! The OS mixer integration lives outside this crate; everything here goes
//! through [`VolumeControl`].

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info};

use crate::protocol::MAX_STATE;

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("unknown audio device: {0}")]
    UnknownDevice(String),

    #[error("volume backend failure on {device}: {reason}")]
    Backend { device: String, reason: String },
}

/// Read and write the master volume of an audio endpoint, in percent
///
/// Methods take `&self` so one backend can be shared as `Arc<dyn VolumeControl>`.
#[async_trait]
pub trait VolumeControl: Send + Sync {
    fn name(&self) -> &str;

    async fn volume(&self, device_id: &str) -> Result<u8, VolumeError>;

    async fn set_volume(&self, device_id: &str, percent: u8) -> Result<(), VolumeError>;
}

/// In-memory backend that logs every change
///
/// Unknown devices read as `initial` until first written.
pub struct ConsoleVolume {
    initial: u8,
    levels: RwLock<HashMap<String, u8>>,
    writes: AtomicU64,
}

impl ConsoleVolume {
    pub fn new(initial: u8) -> Self {
        Self {
            initial: initial.min(MAX_STATE),
            levels: RwLock::new(HashMap::new()),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of `set_volume` calls served
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Current level of every device written so far
    pub fn snapshot(&self) -> HashMap<String, u8> {
        self.levels.read().clone()
    }
}

impl Default for ConsoleVolume {
    fn default() -> Self {
        Self::new(50)
    }
}

#[async_trait]
impl VolumeControl for ConsoleVolume {
    fn name(&self) -> &str {
        "console"
    }

    async fn volume(&self, device_id: &str) -> Result<u8, VolumeError> {
        let level = self.levels.read().get(device_id).copied().unwrap_or(self.initial);
        debug!(device = device_id, level, "ConsoleVolume read");
        Ok(level)
    }

    async fn set_volume(&self, device_id: &str, percent: u8) -> Result<(), VolumeError> {
        let percent = percent.min(MAX_STATE);
        let previous = self.levels.write().insert(device_id.to_string(), percent);
        let count = self.writes.fetch_add(1, Ordering::Relaxed) + 1;

        info!(
            "🔊 [{}] {} → {}% (was {}) [write #{}]",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            device_id,
            percent,
            previous.unwrap_or(self.initial),
            count
        );
        Ok(())
    }
}
