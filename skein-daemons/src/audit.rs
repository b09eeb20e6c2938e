//! Audit daemon
//!
//! Periodically classifies work older than a buffer:
//!
//! - expired: still non-terminal, withdrawn more than `timeout + buffer`
//!   ago. Forced to `failure` with an expiry note and a bumped attempt.
//! - stale: a final failure beyond the buffer that was never transferred.
//!   Flagged for operator attention, never touched.
//! - orphan: expanded from a pipeline configuration that no longer exists
//!   in the pipelines manager. Marked `cancelled`.
//!
//! The audit daemon never deletes; deletion belongs to the transfer
//! daemon and operators.

use skein_client::{Buckets, Kind, Pipelines};
use skein_core::domain::work::unix_now;
use skein_core::dto::{AuditReport, ViewQuery};
use skein_core::{Work, WorkStatus};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::DaemonConfig;

/// What the audit found out about one work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finding {
    Expired,
    Stale,
}

/// Classifies a non-terminal item as expired when its current attempt
/// ran out of budget more than `buffer` seconds ago.
pub fn classify_expired(work: &Work, now: f64, buffer: f64) -> Option<Finding> {
    if work.is_terminal() {
        return None;
    }
    let start = work.start?;
    (start + work.timeout as f64 + buffer < now).then_some(Finding::Expired)
}

/// Classifies a terminal failure as stale when it exhausted its retries
/// more than `buffer` seconds ago and is still in the bucket.
pub fn classify_stale(work: &Work, now: f64, buffer: f64) -> Option<Finding> {
    if work.status != WorkStatus::Failure || !work.retries_exhausted() {
        return None;
    }
    let reference = work.stop.or(work.creation)?;
    (reference + buffer < now).then_some(Finding::Stale)
}

/// The audit reconciliation loop.
pub struct AuditDaemon {
    buckets: Buckets,
    pipelines: Option<Pipelines>,
    config: DaemonConfig,
}

impl AuditDaemon {
    pub fn new(buckets: Buckets, pipelines: Option<Pipelines>, config: DaemonConfig) -> Self {
        Self {
            buckets,
            pipelines,
            config,
        }
    }

    /// Runs cycles on the configured period until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(period = ?self.config.period, "starting audit daemon");
        let mut interval = tokio::time::interval(self.config.period);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                info!("shutdown requested, stopping audit daemon");
                break;
            }
            match self.cycle().await {
                Ok(report) => info!(
                    expired = report.expired,
                    stale = report.stale,
                    orphaned = report.orphaned,
                    "audit cycle complete"
                ),
                Err(err) => error!("audit cycle failed: {err:#}"),
            }
        }
    }

    /// One audit pass over every configured pipeline.
    pub async fn cycle(&self) -> anyhow::Result<AuditReport> {
        let mut report = AuditReport::default();
        let now = unix_now();
        let buffer = self.config.buffer.as_secs_f64();

        for pipeline in self.config.pipeline_filters() {
            self.audit_running(pipeline.clone(), now, buffer, &mut report)
                .await?;
            self.audit_failed(pipeline, now, buffer, &mut report).await?;
        }
        Ok(report)
    }

    /// Expires overdue running work and cancels orphans.
    async fn audit_running(
        &self,
        pipeline: Option<String>,
        now: f64,
        buffer: f64,
        report: &mut AuditReport,
    ) -> anyhow::Result<()> {
        let running = self
            .buckets
            .view(&ViewQuery {
                pipeline,
                status: Some(WorkStatus::Running),
                limit: self.config.batch_size,
                ..Default::default()
            })
            .await?;

        for mut work in running {
            if self.orphaned(&work).await? {
                info!(id = ?work.id, parent = ?work.config.parent, "orphan, cancelling");
                work.status = WorkStatus::Cancelled;
                work.record_error("pipeline configuration no longer exists");
                work.stop = Some(now);
                self.buckets.update(&work).await?;
                report.orphaned += 1;
                continue;
            }
            if classify_expired(&work, now, buffer) == Some(Finding::Expired) {
                info!(id = ?work.id, "expired, forcing failure");
                work.status = WorkStatus::Failure;
                work.record_error(format!(
                    "expired: no update within {}s of its {}s budget",
                    buffer as u64, work.timeout
                ));
                work.attempt += 1;
                work.stop = Some(now);
                self.buckets.update(&work).await?;
                report.expired += 1;
            }
        }
        Ok(())
    }

    /// Flags stale final failures. No mutation, no deletion.
    async fn audit_failed(
        &self,
        pipeline: Option<String>,
        now: f64,
        buffer: f64,
        report: &mut AuditReport,
    ) -> anyhow::Result<()> {
        let failed = self
            .buckets
            .view(&ViewQuery {
                pipeline,
                status: Some(WorkStatus::Failure),
                limit: self.config.batch_size,
                ..Default::default()
            })
            .await?;

        for work in failed {
            if classify_stale(&work, now, buffer) == Some(Finding::Stale) {
                warn!(
                    id = ?work.id,
                    pipeline = %work.pipeline,
                    "stale failure needs operator attention"
                );
                report.stale += 1;
            }
        }
        Ok(())
    }

    /// A running work item is orphaned when its parent configuration is
    /// gone from the pipelines manager. Without a pipelines client the
    /// check is skipped.
    async fn orphaned(&self, work: &Work) -> anyhow::Result<bool> {
        let Some(parent) = &work.config.parent else {
            return Ok(false);
        };
        let Some(pipelines) = &self.pipelines else {
            debug!("no pipelines client, skipping orphan check");
            return Ok(false);
        };
        Ok(!pipelines.exists(Kind::Pipelines, parent).await?)
    }
}
