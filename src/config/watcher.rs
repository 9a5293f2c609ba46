//! Configuration file watcher for hot reload.
//!
//! Only breaker defaults are reloadable at runtime. Breakers that already exist
//! keep the config they were built with; the task manager keeps its capacity.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::ResilienceConfig;

/// Watches the config file and forwards every version that loads and validates.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<ResilienceConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for validated configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ResilienceConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self { path, update_tx } = self;
        let watched = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if triggers_reload(&event.kind) => reload(&path, &update_tx),
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&watched, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %watched.display(), "Config watcher started");
        Ok(watcher)
    }
}

fn triggers_reload(kind: &EventKind) -> bool {
    kind.is_modify() || kind.is_create()
}

fn reload(path: &Path, tx: &mpsc::UnboundedSender<ResilienceConfig>) {
    match load_config(path) {
        Ok(config) => {
            tracing::info!(
                path = %path.display(),
                overrides = config.breakers.len(),
                "Config reloaded"
            );
            if tx.send(config).is_err() {
                tracing::debug!("Config update receiver dropped");
            }
        }
        Err(e) => {
            tracing::error!(
                path = %path.display(),
                error = %e,
                "Config reload failed, keeping current configuration"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};

    #[test]
    fn test_reload_triggers() {
        assert!(triggers_reload(&EventKind::Modify(ModifyKind::Any)));
        assert!(triggers_reload(&EventKind::Create(CreateKind::File)));
        assert!(!triggers_reload(&EventKind::Access(AccessKind::Any)));
    }

    #[test]
    fn test_reload_forwards_only_valid_configs() {
        let dir = std::env::temp_dir().join(format!("resilience-watch-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        let (tx, mut rx) = mpsc::unbounded_channel();

        std::fs::write(&path, "[circuit_breaker]\nfailure_threshold = 7\n").unwrap();
        reload(&path, &tx);
        assert_eq!(rx.try_recv().unwrap().circuit_breaker.failure_threshold, 7);

        std::fs::write(&path, "[circuit_breaker]\nfailure_threshold = 0\n").unwrap();
        reload(&path, &tx);
        assert!(rx.try_recv().is_err());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
