//! Template directory watcher.
//!
//! Watches the override directory and invalidates the registry cache
//! when a template file changes, so swapped templates take effect
//! without a restart. The watcher is advisory: explicit invalidation
//! through the registry always works.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info, warn};
use notify::{Config as NotifyConfig, PollWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer_opt, Config as DebouncerConfig, DebouncedEventKind};

use crate::error::WorkerError;
use crate::template::registry::TemplateRegistry;

/// Stops the watcher thread when dropped.
pub struct TemplateWatcher {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TemplateWatcher {
    /// Spawns a background thread watching `dir` and invalidating
    /// `registry` on changes.
    pub fn spawn(
        dir: &Path,
        registry: Arc<TemplateRegistry>,
    ) -> Result<Self, WorkerError> {
        let dir = dir.to_path_buf();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);

        let handle = std::thread::Builder::new()
            .name("fleetdocs-template-watcher".into())
            .spawn(move || {
                if let Err(e) = watch_loop(&dir, registry, shutdown_flag) {
                    warn!("Template watcher stopped with error: {}", e);
                }
            })
            .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TemplateWatcher {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

fn watch_loop(
    dir: &Path,
    registry: Arc<TemplateRegistry>,
    shutdown: Arc<AtomicBool>,
) -> Result<(), WorkerError> {
    // Use PollWatcher for Docker/NFS compatibility
    let poll_config = NotifyConfig::default().with_poll_interval(Duration::from_secs(2));

    let debouncer_config = DebouncerConfig::default()
        .with_timeout(Duration::from_millis(500))
        .with_notify_config(poll_config);

    let (tx, rx) = std::sync::mpsc::channel();

    let mut debouncer = new_debouncer_opt::<_, PollWatcher>(debouncer_config, tx)
        .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

    debouncer
        .watcher()
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

    info!("Watching template directory: {}", dir.display());

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Template watcher shutting down...");
            break;
        }

        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(Ok(events)) => {
                let touched_template = events.iter().any(|event| {
                    matches!(event.kind, DebouncedEventKind::Any)
                        && event
                            .path
                            .extension()
                            .map(|ext| ext == "json")
                            .unwrap_or(false)
                });
                if touched_template {
                    info!("Template directory changed, invalidating cache");
                    registry.invalidate_all();
                }
            }
            Ok(Err(e)) => {
                warn!("Template watch error: {:?}", e);
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                debug!("Template watch channel disconnected");
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watcher_spawns_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(TemplateRegistry::new(Some(dir.path().to_path_buf())));

        let watcher = TemplateWatcher::spawn(dir.path(), registry).unwrap();
        watcher.stop();
    }

    #[test]
    fn test_watcher_drop_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(TemplateRegistry::new(Some(dir.path().to_path_buf())));

        let watcher = TemplateWatcher::spawn(dir.path(), registry).unwrap();
        drop(watcher);
    }
}
