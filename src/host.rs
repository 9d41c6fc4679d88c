//! Host side of the link
//!
//! Two long-running tasks share a [`HostContext`]:
//! - the event processor turns device events into volume changes;
//! - the volume sync periodically pushes the current volumes back to the
//!   device as `SET` events so its displays follow external changes.

use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::protocol::{clamp_state, Event, EventType};
use crate::transport::{TransportError, TransportSender};
use crate::volume::{VolumeControl, VolumeError};

/// Shared state of the host tasks
#[derive(Clone)]
pub struct HostContext {
    config: Arc<RwLock<AppConfig>>,
    volume: Arc<dyn VolumeControl>,
}

impl HostContext {
    pub fn new(config: AppConfig, volume: Arc<dyn VolumeControl>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            volume,
        }
    }

    pub fn volume(&self) -> &Arc<dyn VolumeControl> {
        &self.volume
    }

    /// Swap in a reloaded configuration
    pub async fn update_config(&self, config: AppConfig) {
        let combos = config.combos.len();
        *self.config.write().await = config;
        info!("Host now maps {} combo(s)", combos);
    }

    pub async fn config(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    async fn device_for(&self, combo: u8) -> Option<String> {
        self.config
            .read()
            .await
            .combo(combo)
            .map(|c| c.device_id.clone())
    }

    /// Apply one event from the device
    ///
    /// Returns the volume that was set, if any. Unmapped combos and
    /// non-volume events are logged and ignored.
    pub async fn handle_event(&self, event: Event) -> Result<Option<u8>, VolumeError> {
        match event.kind {
            EventType::Cw | EventType::Ccw | EventType::Click | EventType::DoubleClick => {
                let Some(device_id) = self.device_for(event.combo).await else {
                    warn!("No audio device mapped to combo {}, ignoring {}", event.combo, event);
                    return Ok(None);
                };
                let percent = clamp_state(i32::from(event.state));
                self.volume.set_volume(&device_id, percent).await?;
                Ok(Some(percent))
            }
            EventType::Ack => {
                debug!("ACK from combo {} at {}", event.combo, event.state);
                Ok(None)
            }
            EventType::Set => {
                warn!("Unexpected SET from device: {}", event);
                Ok(None)
            }
        }
    }

    /// Enqueue a `SET` with the current volume of every mapped combo
    ///
    /// Returns how many events were queued. Read failures skip the combo;
    /// a saturated send channel is warned about and skipped.
    pub async fn sync_volumes(&self, sender: &TransportSender) -> Result<usize, TransportError> {
        let combos = self.config.read().await.combos.clone();
        let mut queued = 0;

        for combo in combos {
            let level = match self.volume.volume(&combo.device_id).await {
                Ok(level) => level,
                Err(e) => {
                    warn!("Could not read volume for combo {}: {}", combo.combo, e);
                    continue;
                }
            };
            match sender.send(Event::set(combo.combo, level)) {
                Ok(()) => queued += 1,
                Err(TransportError::ChannelSaturated { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        debug!("Queued {} SET event(s)", queued);
        Ok(queued)
    }
}

/// Drain the receive channel until it closes or `cancel` fires
pub async fn run_event_processor(
    ctx: HostContext,
    mut events: mpsc::Receiver<Event>,
    cancel: CancellationToken,
) {
    info!("Event processor started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => {
                    if let Err(e) = ctx.handle_event(event).await {
                        warn!("Failed to apply {}: {}", event, e);
                    }
                }
                None => {
                    debug!("Receive channel closed");
                    break;
                }
            },
        }
    }

    info!("Event processor stopped");
}

/// Push volumes at startup and then every `set_event_period_ms`
///
/// The period is re-read from the live config on every round.
pub async fn run_volume_sync(ctx: HostContext, sender: TransportSender, cancel: CancellationToken) {
    info!("Volume sync started");

    loop {
        if let Err(e) = ctx.sync_volumes(&sender).await {
            debug!("Stopping volume sync: {}", e);
            break;
        }

        let period = ctx.config.read().await.set_event_period();
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(period) => {}
        }
    }

    info!("Volume sync stopped");
}
