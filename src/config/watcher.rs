//! Hot-reload of the combo mapping file

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::AppConfig;

/// Wait this long after a change before re-reading, so partial writes settle
pub const RELOAD_DEBOUNCE: Duration = Duration::from_millis(100);

/// Watches the config file and yields every successfully validated revision
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    path: PathBuf,
    rx: mpsc::Receiver<AppConfig>,
}

impl ConfigWatcher {
    /// Load `config_path` and start watching it
    ///
    /// Returns the watcher together with the initial configuration. A revision
    /// that fails to parse or validate is logged and skipped; the previous
    /// configuration stays in effect.
    pub async fn new(config_path: impl AsRef<Path>) -> Result<(Self, Arc<AppConfig>)> {
        let path = config_path.as_ref().to_path_buf();
        let path_str = path.to_string_lossy().to_string();

        let initial = AppConfig::load(&path_str)
            .await
            .context("Failed to load initial config")?;

        let (tx, rx) = mpsc::channel(10);
        // notify calls back on its own thread
        let runtime = tokio::runtime::Handle::current();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    error!("Config watch error: {}", e);
                    return;
                }
            };
            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                return;
            }
            debug!("Config file changed: {:?}", event.paths);

            let path = path_str.clone();
            let tx = tx.clone();
            runtime.spawn(async move {
                tokio::time::sleep(RELOAD_DEBOUNCE).await;
                match AppConfig::load(&path).await {
                    Ok(config) => {
                        info!("🔄 Configuration reloaded ({} combo mapping(s))", config.combos.len());
                        if tx.send(config).await.is_err() {
                            debug!("Config receiver gone, dropping reload");
                        }
                    }
                    Err(e) => warn!("Failed to reload config (keeping old config): {:#}", e),
                }
            });
        })?;

        watcher
            .watch(&path, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config file: {}", path.display()))?;

        info!("Watching config file {}", path.display());

        Ok((
            Self {
                _watcher: watcher,
                path,
                rx,
            },
            Arc::new(initial),
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next reloaded configuration; `None` once the watcher is gone
    pub async fn next_config(&mut self) -> Option<AppConfig> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reload_on_change() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("combos.yaml");

        fs::write(
            &config_path,
            r#"
combos:
  - combo: 0
    device_id: "speakers"
"#,
        )?;

        let (mut watcher, config) = ConfigWatcher::new(&config_path).await?;
        assert_eq!(config.combo(0).map(|c| c.device_id.as_str()), Some("speakers"));
        assert_eq!(watcher.path(), config_path.as_path());

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(
            &config_path,
            r#"
combos:
  - combo: 0
    device_id: "headset"
  - combo: 2
    device_id: "media"
"#,
        )?;

        // Some platforms report no events for tempdirs; only check what arrives
        if let Ok(Some(new_config)) =
            tokio::time::timeout(Duration::from_secs(2), watcher.next_config()).await
        {
            assert_eq!(new_config.combo(0).map(|c| c.device_id.as_str()), Some("headset"));
            assert_eq!(new_config.combos.len(), 2);
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope.yaml");
        assert!(ConfigWatcher::new(&missing).await.is_err());
    }
}
