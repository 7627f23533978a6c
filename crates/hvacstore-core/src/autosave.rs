//! Periodic auto-save
//!
//! [`AutoSaveTimer`] watches the editor's latest document snapshot and writes
//! an auto-save every `interval_ms` when the snapshot changed since the last
//! tick. Failures are logged and the loop keeps going.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AutoSaveConfig;
use crate::project::ProjectDocument;
use crate::storage::StorageAdapter;

/// Counters reported when the timer stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutoSaveStats {
    pub saved: usize,
    pub failed: usize,
}

/// Handle to a running auto-save loop
pub struct AutoSaveTimer {
    cancel: CancellationToken,
    task: JoinHandle<AutoSaveStats>,
}

impl AutoSaveTimer {
    /// Start the loop on the current runtime
    ///
    /// When `config.enabled` is false the task finishes immediately. The loop
    /// also ends when every snapshot sender is dropped.
    pub fn spawn(
        adapter: Arc<dyn StorageAdapter>,
        snapshots: watch::Receiver<Option<ProjectDocument>>,
        config: AutoSaveConfig,
        cancel: CancellationToken,
    ) -> Self {
        let task = tokio::spawn(run(adapter, snapshots, config, cancel.clone()));
        Self { cancel, task }
    }

    /// Stop after the current tick
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel and wait for the loop to exit
    pub async fn shutdown(self) -> AutoSaveStats {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for the loop to exit on its own
    pub async fn join(self) -> AutoSaveStats {
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Auto-save task ended abnormally");
                AutoSaveStats::default()
            }
        }
    }
}

async fn run(
    adapter: Arc<dyn StorageAdapter>,
    mut snapshots: watch::Receiver<Option<ProjectDocument>>,
    config: AutoSaveConfig,
    cancel: CancellationToken,
) -> AutoSaveStats {
    let mut stats = AutoSaveStats::default();
    if !config.enabled {
        debug!("Auto-save disabled");
        return stats;
    }

    let period = Duration::from_millis(config.interval_ms.max(1));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick completes immediately
    interval.tick().await;

    info!(adapter = %adapter.kind(), interval_ms = config.interval_ms, "Auto-save started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        match snapshots.has_changed() {
            Ok(true) => {}
            Ok(false) => continue,
            Err(_) => {
                debug!("Snapshot sender dropped");
                break;
            }
        }
        let Some(project) = snapshots.borrow_and_update().clone() else {
            continue;
        };

        match adapter.auto_save(&project).await {
            Ok(outcome) => {
                stats.saved += 1;
                debug!(
                    project_id = %project.project_id,
                    auto_save_id = %outcome.record.auto_save_id,
                    "Auto-save written"
                );
            }
            Err(e) => {
                stats.failed += 1;
                warn!(project_id = %project.project_id, code = %e.code(), error = %e, "Auto-save failed");
            }
        }
    }

    info!(saved = stats.saved, failed = stats.failed, "Auto-save stopped");
    stats
}
