//! Where the config file and logs live.
//!
//! - **Local mode**: a `config.yaml` in the current working directory wins,
//!   logs go to `./logs`.
//! - **User mode** (default): `<config dir>/combo-link/config.yaml`
//!   (`%APPDATA%` on Windows, `~/.config` on Linux) with logs next to it.

use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Directory name under the user config dir
const APP_DIR: &str = "combo-link";

const CONFIG_FILE: &str = "config.yaml";

/// Written on first start when no config exists yet
pub const EXAMPLE_CONFIG: &str = include_str!("../config.example.yaml");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub config: PathBuf,
    pub logs_dir: PathBuf,
    /// Config found in the working directory
    pub is_local: bool,
}

impl AppPaths {
    /// Detect paths from the working directory and the user config dir
    ///
    /// Runs before logging is set up.
    pub fn detect() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let user_dir = dirs::config_dir().map(|d| d.join(APP_DIR));
        Self::resolve(&cwd, user_dir)
    }

    fn resolve(cwd: &Path, user_dir: Option<PathBuf>) -> Self {
        let local_config = cwd.join(CONFIG_FILE);
        if local_config.exists() {
            return Self {
                config: local_config,
                logs_dir: cwd.join("logs"),
                is_local: true,
            };
        }

        match user_dir {
            Some(dir) => Self {
                config: dir.join(CONFIG_FILE),
                logs_dir: dir.join("logs"),
                is_local: false,
            },
            None => {
                eprintln!("[paths] no user config directory, using working directory");
                Self {
                    config: local_config,
                    logs_dir: cwd.join("logs"),
                    is_local: true,
                }
            }
        }
    }

    /// Resolve a log file name against the logs directory
    ///
    /// Absolute paths are returned unchanged.
    pub fn log_path(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.logs_dir.join(path)
        }
    }

    /// Create the logs and config directories, seeding an example config
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        if !self.logs_dir.exists() {
            debug!("Creating logs directory: {}", self.logs_dir.display());
            std::fs::create_dir_all(&self.logs_dir)?;
        }

        if let Some(parent) = self.config.parent() {
            if !parent.exists() {
                debug!("Creating config directory: {}", parent.display());
                std::fs::create_dir_all(parent)?;
            }
        }

        if !self.config.exists() {
            info!("No config found, writing example to {}", self.config.display());
            std::fs::write(&self.config, EXAMPLE_CONFIG).with_context(|| {
                format!("Failed to write example config to {}", self.config.display())
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use tempfile::TempDir;

    #[test]
    fn test_local_config_wins() {
        let cwd = TempDir::new().unwrap();
        std::fs::write(cwd.path().join("config.yaml"), "{}").unwrap();

        let paths = AppPaths::resolve(cwd.path(), Some(PathBuf::from("/unused")));
        assert!(paths.is_local);
        assert_eq!(paths.config, cwd.path().join("config.yaml"));
        assert_eq!(paths.logs_dir, cwd.path().join("logs"));
    }

    #[test]
    fn test_user_dir_used_without_local_config() {
        let cwd = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();

        let paths = AppPaths::resolve(cwd.path(), Some(user.path().to_path_buf()));
        assert!(!paths.is_local);
        assert_eq!(paths.config, user.path().join("config.yaml"));
        assert_eq!(paths.log_path("link.log"), user.path().join("logs").join("link.log"));
    }

    #[test]
    fn test_ensure_directories_seeds_valid_config() {
        let cwd = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();
        let paths = AppPaths::resolve(cwd.path(), Some(user.path().join("nested")));

        paths.ensure_directories().unwrap();

        assert!(paths.logs_dir.is_dir());
        let written = std::fs::read_to_string(&paths.config).unwrap();
        assert!(AppConfig::from_yaml(&written).is_ok());
    }

    #[test]
    fn test_absolute_log_path_kept() {
        let paths = AppPaths {
            config: PathBuf::from("cfg/config.yaml"),
            logs_dir: PathBuf::from("cfg/logs"),
            is_local: true,
        };
        let absolute = std::env::temp_dir().join("combo.log");
        assert_eq!(paths.log_path(absolute.to_str().unwrap()), absolute);
    }
}
