//! Background reconciliation of stored files against document rows.

use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::SweeperConfig;
use crate::db::{DocumentStore, StoreError};
use crate::metrics;
use crate::storage::{FileStorage, StorageError};

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("listing stored files failed: {0}")]
    Listing(#[from] StorageError),
    #[error("loading document paths failed: {0}")]
    Store(#[from] StoreError),
}

/// Counts from one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub orphaned: usize,
    pub deleted: usize,
    pub failed: usize,
    /// Orphans left alone because they are newer than the minimum age.
    pub skipped_young: usize,
    /// Another run was already in progress, so this one did nothing.
    pub skipped: bool,
}

pub struct ReconciliationSweeper {
    storage: Arc<dyn FileStorage>,
    documents: Arc<dyn DocumentStore>,
    config: SweeperConfig,
    running: Mutex<()>,
}

impl ReconciliationSweeper {
    pub fn new(
        storage: Arc<dyn FileStorage>,
        documents: Arc<dyn DocumentStore>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            storage,
            documents,
            config,
            running: Mutex::new(()),
        }
    }

    /// Delete every file that has no document row and is old enough.
    ///
    /// Files are listed before paths are loaded: a document committed in between
    /// then shows up in the path set and its file survives.
    pub async fn run_once(&self) -> Result<SweepReport, SweepError> {
        let _guard = match self.running.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                log::info!("Reconciliation already running, skipping");
                return Ok(SweepReport {
                    skipped: true,
                    ..SweepReport::default()
                });
            }
        };

        let files = self.storage.list().await?;
        let known = self.documents.all_storage_paths().await?;
        let now = SystemTime::now();

        let mut report = SweepReport {
            scanned: files.len(),
            ..SweepReport::default()
        };

        for file in files.into_iter().filter(|f| !known.contains(&f.path)) {
            report.orphaned += 1;

            let age = now.duration_since(file.modified).unwrap_or_default();
            if age < self.config.min_file_age {
                report.skipped_young += 1;
                continue;
            }

            match self.storage.delete(&file.path).await {
                Ok(()) => {
                    log::info!("Deleted orphaned file: {}", file.path);
                    report.deleted += 1;
                }
                Err(e) => {
                    log::warn!("Failed to delete orphaned file {}: {}", file.path, e);
                    report.failed += 1;
                }
            }
        }

        metrics::SWEEP_RUNS.inc();
        metrics::ORPHANS_DELETED.inc_by(report.deleted as u64);
        log::info!(
            "Reconciliation finished: scanned={} orphaned={} deleted={} failed={} skipped_young={}",
            report.scanned,
            report.orphaned,
            report.deleted,
            report.failed,
            report.skipped_young
        );
        Ok(report)
    }

    /// Run after the initial delay and then once per interval until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        log::info!(
            "Reconciliation sweeper started (first run in {:?}, then every {:?})",
            self.config.initial_delay,
            self.config.interval
        );

        let mut delay = self.config.initial_delay;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            if let Err(e) = self.run_once().await {
                log::error!("Reconciliation run failed: {}", e);
            }
            delay = self.config.interval;
        }

        log::info!("Reconciliation sweeper stopped");
    }
}
