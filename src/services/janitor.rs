//! Deletion of transient staging artifacts.
//!
//! Two independent mechanisms, both required: an immediate cleanup channel
//! drained by a dedicated task (fed by `StagedFile` guards and handlers once
//! a response payload is fully in memory), and a periodic orphan sweep that
//! reaps anything the first mechanism missed after a crash or bug.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Handle to the cleanup task. Cheap to clone; every staged-file guard holds
/// one so release works from both async code and `Drop`.
#[derive(Clone, Debug)]
pub struct Janitor {
    tx: mpsc::UnboundedSender<PathBuf>,
}

impl Janitor {
    /// Spawns the drain task and returns the sending handle.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();
        tokio::spawn(async move {
            while let Some(path) = rx.recv().await {
                remove_quietly(&path).await;
            }
        });
        Self { tx }
    }

    /// Schedules a path for deletion. Never fails: if the drain task is gone
    /// (runtime shutdown), falls back to a synchronous best-effort delete.
    pub fn discard(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        if let Err(e) = self.tx.send(path) {
            let _ = std::fs::remove_file(&e.0);
        }
    }
}

/// Idempotent delete: a missing path is not an error.
pub async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Deleted staging artifact {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
    }
}

/// Deletes every regular file in `dir` whose mtime is older than `retention`.
/// Returns the number of files reaped. Errors on individual entries are
/// logged and skipped; the sweep itself never fails the process.
pub async fn sweep_once(dir: &Path, retention: Duration) -> usize {
    let mut reaped = 0;

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Sweep cannot read {}: {}", dir.display(), e);
            return 0;
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let age = metadata
            .modified()
            .ok()
            .and_then(|mtime| mtime.elapsed().ok());
        match age {
            Some(age) if age > retention => {
                warn!(
                    "Sweep reaping orphaned artifact {} (age {:?})",
                    path.display(),
                    age
                );
                remove_quietly(&path).await;
                reaped += 1;
            }
            _ => {}
        }
    }

    reaped
}

/// Background worker running the orphan sweep once at startup and then at a
/// fixed interval until shutdown is signalled.
pub struct SweepWorker {
    staging_dir: PathBuf,
    interval: Duration,
    retention: Duration,
    shutdown: watch::Receiver<bool>,
}

impl SweepWorker {
    pub fn new(
        staging_dir: PathBuf,
        interval: Duration,
        retention: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            staging_dir,
            interval,
            retention,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!(
            "Orphan sweep started for {} (every {:?}, retention {:?})",
            self.staging_dir.display(),
            self.interval,
            self.retention
        );

        // Startup pass picks up anything left behind by a previous crash
        self.perform_sweep().await;

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    info!("Orphan sweep shutting down");
                    break;
                }
                _ = sleep(self.interval) => {
                    self.perform_sweep().await;
                }
            }
        }
    }

    async fn perform_sweep(&self) {
        let reaped = sweep_once(&self.staging_dir, self.retention).await;
        if reaped > 0 {
            info!("Orphan sweep reaped {} stale artifact(s)", reaped);
        }
    }
}
