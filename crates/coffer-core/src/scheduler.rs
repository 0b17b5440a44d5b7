//! Periodic backup scheduler.
//!
//! One background loop per engine, driven by the configured frequency.
//! A failed run is logged and the loop keeps going; one bad backup must
//! not cancel future attempts. The `Notify` handle forces an immediate
//! run (startup, operator request); the `watch` channel shuts the loop
//! down.

use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::backup::BackupEngine;

/// Handle returned to the caller so it can request an immediate backup or
/// shut the loop down.
pub struct SchedulerHandle {
    /// Notify to wake the loop early.
    pub wake: Arc<Notify>,
    /// Send `true` to shut down.
    pub shutdown_tx: watch::Sender<bool>,
}

/// Spawn the backup loop as a tokio task. Runs (KDF, compression, disk
/// I/O) go through `spawn_blocking` so the async runtime stays responsive.
pub fn spawn_backup_scheduler(engine: Arc<BackupEngine>) -> (tokio::task::JoinHandle<()>, SchedulerHandle) {
    let interval = engine.config().frequency.interval();
    let wake = Arc::new(Notify::new());
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let wake_clone = wake.clone();

    let handle = tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "backup scheduler started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = wake_clone.notified() => {
                    debug!("backup scheduler woken early");
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("backup scheduler shutting down");
                        return;
                    }
                }
            }

            // Check shutdown again after wakeup.
            if *shutdown_rx.borrow() {
                return;
            }

            let engine = engine.clone();
            match tokio::task::spawn_blocking(move || engine.create_full_backup()).await {
                Ok(Ok(metadata)) => {
                    info!(
                        backup_id = %metadata.id,
                        size_bytes = metadata.size_bytes,
                        "scheduled backup complete"
                    );
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "scheduled backup failed");
                }
                Err(e) => {
                    warn!(error = %e, "scheduled backup task panicked");
                }
            }
        }
    });

    (
        handle,
        SchedulerHandle {
            wake,
            shutdown_tx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{BackupFilter, MemoryBackupIndex};
    use crate::config::BackupConfig;
    use crate::keys::MemoryKeyProvider;
    use crate::storage::MemoryBackend;
    use std::time::Duration;
    use tempfile::tempdir;

    fn engine(location: std::path::PathBuf) -> Arc<BackupEngine> {
        let mut config = BackupConfig::new(location);
        config.encrypt = false;
        Arc::new(BackupEngine::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(MemoryKeyProvider::new()),
            Arc::new(MemoryBackupIndex::new()),
            config,
        ))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wake_triggers_run_and_shutdown_stops_loop() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path().to_path_buf());
        let (handle, control) = spawn_backup_scheduler(engine.clone());

        control.wake.notify_one();
        let mut ran = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if !engine.list_backups(&BackupFilter::default()).unwrap().is_empty() {
                ran = true;
                break;
            }
        }
        assert!(ran, "woken scheduler should have produced a backup");

        control.shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler should exit on shutdown")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_run_does_not_kill_loop() {
        // Point the engine at a location that cannot be created.
        let dir = tempdir().unwrap();
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"not a directory").unwrap();
        let engine = engine(blocked.join("archives"));
        let (handle, control) = spawn_backup_scheduler(engine);

        control.wake.notify_one();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!handle.is_finished(), "loop must survive a failed run");

        control.shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler should exit on shutdown")
            .unwrap();
    }
}
