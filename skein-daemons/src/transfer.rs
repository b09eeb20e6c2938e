//! Transfer daemon
//!
//! Periodically scans the bucket for terminal work, applies the
//! workspace's archive policy to its artifacts, forwards results to the
//! results service, and deletes committed work from the queue. Ownership
//! of a work item moves from the bucket to the results store exactly at
//! the delete.
//!
//! Per-item failures are isolated: the item stays in the bucket for a
//! later cycle. Policy violations abort the whole batch.

use skein_client::{Buckets, Results};
use skein_core::dto::{TransferOutcome, ViewQuery};
use skein_core::{Work, WorkStatus, Workspace};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::archive;
use crate::config::DaemonConfig;

/// Where a terminal work item goes after archival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Deposit into the results service, then delete from the bucket.
    Forward,
    /// Delete from the bucket without forwarding.
    Discard,
}

/// Both the work and the workspace must opt into results archival.
pub fn disposition(work: &Work, workspace: &Workspace) -> Disposition {
    if work.config.archive.results && workspace.config.archive.results {
        Disposition::Forward
    } else {
        Disposition::Discard
    }
}

/// Terminal work the transfer daemon may act on: successes, and failures
/// with no retries left.
pub fn eligible(work: &Work) -> bool {
    match work.status {
        WorkStatus::Success | WorkStatus::Cancelled | WorkStatus::Expired => true,
        WorkStatus::Failure => work.retries_exhausted(),
        WorkStatus::Created | WorkStatus::Queued | WorkStatus::Running => false,
    }
}

/// The transfer reconciliation loop.
pub struct TransferDaemon {
    buckets: Buckets,
    results: Option<Results>,
    workspace: Workspace,
    config: DaemonConfig,
}

impl TransferDaemon {
    pub fn new(
        buckets: Buckets,
        results: Option<Results>,
        workspace: Workspace,
        config: DaemonConfig,
    ) -> Self {
        Self {
            buckets,
            results,
            workspace,
            config,
        }
    }

    /// Runs cycles on the configured period until shutdown. Cycle errors
    /// are logged and the next cycle proceeds.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(period = ?self.config.period, "starting transfer daemon");
        let mut interval = tokio::time::interval(self.config.period);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                info!("shutdown requested, stopping transfer daemon");
                break;
            }
            match self.cycle().await {
                Ok(outcome) => info!(
                    transferred = outcome.transferred,
                    deleted = outcome.deleted,
                    failed = outcome.failed,
                    "transfer cycle complete"
                ),
                Err(err) => error!("transfer cycle aborted: {err:#}"),
            }
        }
    }

    /// One reconciliation pass over every configured pipeline.
    pub async fn cycle(&self) -> anyhow::Result<TransferOutcome> {
        let mut outcome = TransferOutcome::default();
        for pipeline in self.config.pipeline_filters() {
            self.reconcile(pipeline, &mut outcome).await?;
        }
        Ok(outcome)
    }

    async fn reconcile(
        &self,
        pipeline: Option<String>,
        outcome: &mut TransferOutcome,
    ) -> anyhow::Result<()> {
        let batch = self.collect(pipeline).await?;
        if batch.is_empty() {
            debug!("no terminal work to transfer");
            return Ok(());
        }

        let mut forward: Vec<Work> = Vec::new();
        let mut delete: Vec<String> = Vec::new();

        for mut work in batch {
            let Some(id) = work.id.clone() else {
                warn!("terminal work without an id, skipping");
                continue;
            };
            match archive::run(&mut work, &self.workspace).await {
                Ok(_) => {}
                Err(err) if err.is_policy() => {
                    // alerted, not retried silently
                    return Err(err.into());
                }
                Err(err) => {
                    warn!(id, "archival failed, leaving work in the bucket: {err}");
                    outcome.failed += 1;
                    continue;
                }
            }
            match disposition(&work, &self.workspace) {
                Disposition::Forward => forward.push(work),
                Disposition::Discard => delete.push(id),
            }
        }

        if !forward.is_empty() {
            self.commit(forward, &mut delete, outcome).await?;
        }

        if !delete.is_empty() {
            self.buckets.delete(&delete).await?;
            outcome.deleted += delete.len();
        }
        Ok(())
    }

    /// Terminal work for one pipeline filter: successes plus failures
    /// with their retry budget spent.
    async fn collect(&self, pipeline: Option<String>) -> anyhow::Result<Vec<Work>> {
        let successes = self
            .buckets
            .view(&ViewQuery {
                pipeline: pipeline.clone(),
                status: Some(WorkStatus::Success),
                limit: self.config.batch_size,
                ..Default::default()
            })
            .await?;
        let failures = self
            .buckets
            .view(&ViewQuery {
                pipeline,
                status: Some(WorkStatus::Failure),
                limit: self.config.batch_size,
                ..Default::default()
            })
            .await?;
        Ok(successes
            .into_iter()
            .chain(failures)
            .filter(eligible)
            .collect())
    }

    /// Deposits forwarded work into the results service. Commit is
    /// at-least-once: on bulk failure, fall back to per-item deposits
    /// guarded by a duplicate check.
    async fn commit(
        &self,
        forward: Vec<Work>,
        delete: &mut Vec<String>,
        outcome: &mut TransferOutcome,
    ) -> anyhow::Result<()> {
        let results = self
            .results
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("results service required but not configured"))?;

        match results.deposit(&forward).await {
            Ok(()) => {
                outcome.transferred += forward.len();
                delete.extend(forward.into_iter().filter_map(|w| w.id));
                return Ok(());
            }
            Err(err) => {
                warn!("bulk transfer failed ({err}), retrying per item with duplicate check");
            }
        }

        for work in forward {
            let Some(id) = work.id.clone() else { continue };
            let duplicate = results
                .exists(&work.pipeline, &id)
                .await
                .unwrap_or(false);
            if duplicate {
                debug!(id, "already in results, deleting from bucket");
                delete.push(id);
                continue;
            }
            match results.deposit(std::slice::from_ref(&work)).await {
                Ok(()) => {
                    outcome.transferred += 1;
                    delete.push(id);
                }
                Err(err) => {
                    warn!(id, "transfer failed, leaving work in the bucket: {err}");
                    outcome.failed += 1;
                }
            }
        }
        Ok(())
    }
}
