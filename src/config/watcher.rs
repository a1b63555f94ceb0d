//! Configuration file watcher for hot reload.
//!
//! The parent directory is watched rather than the file itself: editors and
//! deployment tools often replace the file by rename, which would silently
//! end a watch placed on the original inode.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::GatewayConfig;

/// Stream of validated configurations read after the file changed.
///
/// Dropping it stops the underlying watcher.
pub struct ConfigUpdates {
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<GatewayConfig>,
}

impl ConfigUpdates {
    /// Next valid configuration. Invalid files are logged and skipped.
    pub async fn next(&mut self) -> Option<GatewayConfig> {
        self.rx.recv().await
    }
}

pub struct ConfigWatcher {
    path: PathBuf,
}

impl ConfigWatcher {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Start watching on notify's background thread.
    pub fn watch(self) -> Result<ConfigUpdates, notify::Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let target = self.path.clone();
        let directory = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create()) {
                        return;
                    }
                    if !event.paths.iter().any(|p| p.file_name() == target.file_name()) {
                        return;
                    }
                    tracing::info!(path = %target.display(), "Config file change detected, reloading");
                    match load_config(&target) {
                        Ok(config) => {
                            let _ = tx.send(config);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                        }
                    }
                }
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&directory, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %self.path.display(), "Config watcher started");
        Ok(ConfigUpdates {
            _watcher: watcher,
            rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_valid_changes_and_skips_invalid_ones() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, "").unwrap();

        let mut updates = ConfigWatcher::new(&path).watch().unwrap();

        std::fs::write(&path, "[listener]\nmax_connections = 0\n").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(&path, "[observability]\nlog_level = \"warn\"\n").unwrap();

        let config = loop {
            let next = tokio::time::timeout(Duration::from_secs(5), updates.next())
                .await
                .expect("no config update delivered")
                .expect("watcher closed");
            if next.observability.log_level == "warn" {
                break next;
            }
        };
        assert_eq!(config.observability.log_level, "warn");
    }
}
