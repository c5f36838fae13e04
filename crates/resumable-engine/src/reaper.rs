//! Idle upload reaper
//!
//! Runs a sweep on a fixed interval:
//! 1. expire active uploads whose idle deadline passed (slot released, bytes deleted)
//! 2. delete terminal records older than the retention window
//! 3. delete partial files that no record refers to
//! 4. drop idle per-id locks
//!
//! Each upload is handled independently. A failure is logged, counted and
//! retried on the next sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use resumable_core::UploadError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::engine::UploadEngine;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub purged: usize,
    pub orphans_removed: usize,
    pub failures: usize,
}

pub struct Reaper {
    engine: Arc<UploadEngine>,
    interval: Duration,
}

impl Reaper {
    pub fn new(engine: Arc<UploadEngine>) -> Self {
        let interval = engine.config().sweep_interval;
        Self { engine, interval }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run one full sweep.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let start = std::time::Instant::now();

        self.expire_idle(&mut report).await;
        self.purge_tombstones(&mut report).await;
        self.remove_orphans(&mut report).await;
        let locks_pruned = self.engine.locks().prune().await;

        if report.expired + report.purged + report.orphans_removed + report.failures > 0 {
            tracing::info!(
                expired = report.expired,
                purged = report.purged,
                orphans_removed = report.orphans_removed,
                failures = report.failures,
                locks_pruned = locks_pruned,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Upload sweep finished"
            );
        } else {
            tracing::debug!(locks_pruned = locks_pruned, "Upload sweep found nothing to do");
        }

        report
    }

    async fn expire_idle(&self, report: &mut SweepReport) {
        let candidates = match self.engine.registry().list_expired_before(Utc::now()).await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list idle uploads");
                report.failures += 1;
                return;
            }
        };

        for record in candidates {
            match self.engine.expire(record.id).await {
                Ok(true) => report.expired += 1,
                // Written to (or finished) since the listing
                Ok(false) => {}
                Err(e) if e.is_terminal() => {}
                Err(UploadError::NotFound(_)) => {}
                Err(e) => {
                    tracing::error!(upload_id = %record.id, error = %e, "Failed to expire upload");
                    report.failures += 1;
                }
            }
        }
    }

    async fn purge_tombstones(&self, report: &mut SweepReport) {
        let cutoff = self.engine.config().tombstone_cutoff(Utc::now());
        let tombstones = match self.engine.registry().list_terminal_before(cutoff).await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list terminal uploads");
                report.failures += 1;
                return;
            }
        };

        for record in tombstones {
            match self.engine.purge_tombstone(record.id).await {
                Ok(true) => report.purged += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(upload_id = %record.id, error = %e, "Failed to purge upload record");
                    report.failures += 1;
                }
            }
        }
    }

    async fn remove_orphans(&self, report: &mut SweepReport) {
        let partials = match self.engine.store().list_partials().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list partial files");
                report.failures += 1;
                return;
            }
        };

        for id in partials {
            match self.engine.remove_orphan(id).await {
                Ok(true) => report.orphans_removed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(upload_id = %id, error = %e, "Failed to remove orphaned partial file");
                    report.failures += 1;
                }
            }
        }
    }

    /// Spawn the sweep loop.
    pub fn start(self) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let period = self.interval;

        let join = tokio::spawn(async move {
            tracing::info!(interval_secs = period.as_secs(), "Upload reaper started");
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.sweep().await;
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }

            tracing::info!("Upload reaper stopped");
        });

        ReaperHandle { shutdown_tx, join }
    }
}

pub struct ReaperHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stop the loop and wait for an in-progress sweep to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "Upload reaper task ended abnormally");
        }
    }
}
