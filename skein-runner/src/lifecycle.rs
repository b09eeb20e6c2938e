//! Runner lifecycle
//!
//! The withdraw / execute / update loop. One iteration withdraws a single
//! work item, stamps and executes it, and commits the result back to the
//! bucket. Execution errors are recorded in the work and never propagate;
//! backend errors propagate once the client's retries are exhausted.

use std::sync::Arc;

use async_trait::async_trait;
use skein_core::domain::work::unix_now;
use skein_core::dto::WithdrawFilter;
use skein_core::{Work, WorkStatus};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::RunnerConfig;
use crate::execute;
use crate::registry::Registry;

/// The queue operations the lifecycle needs.
///
/// The bucket service's withdraw is an atomic dequeue, so at most one
/// runner ever holds a given work item in the running state. Tests
/// substitute an in-memory queue with the same guarantee.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn withdraw(
        &self,
        pipeline: &str,
        filter: &WithdrawFilter,
    ) -> skein_client::Result<Option<Work>>;

    async fn update(&self, work: &Work) -> skein_client::Result<()>;
}

#[async_trait]
impl WorkQueue for skein_client::Buckets {
    async fn withdraw(
        &self,
        pipeline: &str,
        filter: &WithdrawFilter,
    ) -> skein_client::Result<Option<Work>> {
        skein_client::Buckets::withdraw(self, pipeline, filter).await
    }

    async fn update(&self, work: &Work) -> skein_client::Result<()> {
        skein_client::Buckets::update(self, work).await
    }
}

/// Counts for one runner's session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Iterations that executed a work item.
    pub performed: u64,
    /// Iterations that found the queue empty.
    pub idle: u64,
}

/// The long-lived runner loop.
pub struct Lifecycle<Q: WorkQueue> {
    config: RunnerConfig,
    queue: Arc<Q>,
    registry: Arc<Registry>,
    shutdown: watch::Receiver<bool>,
}

impl<Q: WorkQueue> Lifecycle<Q> {
    pub fn new(
        config: RunnerConfig,
        queue: Arc<Q>,
        registry: Arc<Registry>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            queue,
            registry,
            shutdown,
        }
    }

    /// Runs until the lifetime is spent or a shutdown signal arrives.
    ///
    /// Backend errors (after the client's own retries) abort the loop and
    /// propagate to the caller.
    pub async fn run(&mut self) -> skein_client::Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut remaining = self.config.lifetime;

        info!(
            pipeline = %self.config.pipeline,
            lifetime = %if self.config.lifetime == 0 { "infinite".to_string() } else { self.config.lifetime.to_string() },
            "starting runner lifecycle"
        );

        loop {
            if *self.shutdown.borrow() {
                info!("shutdown requested, exiting between iterations");
                break;
            }

            if self.iteration().await? {
                summary.performed += 1;
            } else {
                summary.idle += 1;
            }

            if self.config.lifetime > 0 {
                remaining -= 1;
                if remaining == 0 {
                    info!("lifetime spent, exiting");
                    break;
                }
            }

            debug!("sleeping {:?}", self.config.sleep_interval);
            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(self.config.sleep_interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        Ok(summary)
    }

    /// One withdraw / execute / update round. Returns whether a work item
    /// was performed.
    async fn iteration(&mut self) -> skein_client::Result<bool> {
        let filter = self.config.filter();
        let withdrawn = self
            .queue
            .withdraw(&self.config.pipeline, &filter)
            .await?;

        let Some(mut work) = withdrawn else {
            debug!("no work available");
            return Ok(false);
        };

        // terminal states are final; a correct bucket never hands one out
        if work.is_terminal() {
            warn!(id = ?work.id, status = %work.status, "withdrawn work already terminal, skipping");
            return Ok(false);
        }

        info!(id = ?work.id, attempt = work.attempt, "withdrew work");
        self.apply_overloads(&mut work);

        work.start = Some(unix_now());
        work.stop = None;
        work.status = WorkStatus::Running;
        self.queue.update(&work).await?;

        let interrupted = {
            let exec = dispatch(&mut work, &self.registry, &self.config);
            tokio::pin!(exec);
            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                // completed work wins the race against a shutdown signal
                biased;
                _ = &mut exec => false,
                _ = shutdown.changed() => true,
            }
        };
        if interrupted {
            warn!(id = ?work.id, "shutdown during execution, recording interruption");
            work.status = WorkStatus::Failure;
            work.record_error("interrupted by runner shutdown");
        }

        work.stop = Some(unix_now());

        // wall-clock guard over the whole dispatch, not just the child
        if let Some(elapsed) = work.elapsed() {
            if work.status == WorkStatus::Success && elapsed > work.timeout as f64 {
                work.status = WorkStatus::Failure;
                work.record_error(format!(
                    "timeout: ran {elapsed:.1}s past the {}s budget",
                    work.timeout
                ));
            }
        }

        info!(id = ?work.id, status = %work.status, "work finished");
        self.queue.update(&work).await?;
        Ok(true)
    }

    /// Static function/command overloads clear the opposing payload.
    fn apply_overloads(&self, work: &mut Work) {
        if let Some(function) = &self.config.function {
            debug!("overloading work with static function {function}");
            work.command = None;
            work.function = Some(function.clone());
        }
        if let Some(command) = &self.config.command {
            debug!("overloading work with static command {command:?}");
            work.function = None;
            work.command = Some(command.clone());
        }
    }
}

async fn dispatch(work: &mut Work, registry: &Registry, config: &RunnerConfig) {
    if work.command.is_some() {
        execute::command(work).await;
    } else if work.function.is_some() {
        execute::function(work, registry, config.arg_source).await;
    } else {
        work.status = WorkStatus::Failure;
        work.record_error("neither function nor command provided");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Outcome, Parameters};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory queue enforcing the bucket's single-dequeue guarantee.
    #[derive(Default)]
    struct MockQueue {
        pending: Mutex<VecDeque<Work>>,
        updates: Mutex<Vec<Work>>,
    }

    impl MockQueue {
        fn with_work(works: Vec<Work>) -> Arc<Self> {
            Arc::new(Self {
                pending: Mutex::new(works.into_iter().collect()),
                updates: Mutex::new(Vec::new()),
            })
        }

        fn updates(&self) -> Vec<Work> {
            self.updates.lock().unwrap().clone()
        }

        fn last(&self) -> Work {
            self.updates.lock().unwrap().last().cloned().expect("an update")
        }
    }

    #[async_trait]
    impl WorkQueue for MockQueue {
        async fn withdraw(
            &self,
            _pipeline: &str,
            _filter: &WithdrawFilter,
        ) -> skein_client::Result<Option<Work>> {
            // atomic dequeue: a work item is handed out exactly once
            let mut pending = self.pending.lock().unwrap();
            Ok(pending.pop_front().map(|mut work| {
                work.attempt += 1;
                work.status = WorkStatus::Queued;
                work
            }))
        }

        async fn update(&self, work: &Work) -> skein_client::Result<()> {
            self.updates.lock().unwrap().push(work.clone());
            Ok(())
        }
    }

    fn config(pipeline: &str, lifetime: u64) -> RunnerConfig {
        RunnerConfig {
            pipeline: pipeline.to_string(),
            lifetime,
            sleep_interval: Duration::from_millis(5),
            ..Default::default()
        }
    }

    fn registry_with_add() -> Arc<Registry> {
        let mut registry = Registry::new();
        registry.register_fn("tests.add", |input| {
            let params = input.parameters().cloned().unwrap_or_default();
            let sum = params["a"].as_i64().unwrap() + params["b"].as_i64().unwrap();
            let mut results = Parameters::new();
            results.insert("sum".to_string(), json!(sum));
            Ok(Outcome::results(results))
        });
        Arc::new(registry)
    }

    fn shutdown_pair() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn test_happy_path_function() {
        let mut work = Work::new("t1", "local", "tester");
        work.id = Some("w-1".to_string());
        work.function = Some("tests.add".to_string());
        work.parameters = serde_json::from_value(json!({"a": 1, "b": 2})).unwrap();

        let queue = MockQueue::with_work(vec![work]);
        let (_tx, rx) = shutdown_pair();
        let mut lifecycle = Lifecycle::new(config("t1", 1), queue.clone(), registry_with_add(), rx);
        let summary = lifecycle.run().await.unwrap();

        assert_eq!(summary.performed, 1);
        let updates = queue.updates();
        // running stamp, then the terminal commit
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].status, WorkStatus::Running);
        let done = &updates[1];
        assert_eq!(done.status, WorkStatus::Success);
        assert_eq!(done.results.as_ref().unwrap()["sum"], json!(3));
        assert_eq!(done.attempt, 1);
        assert!(done.start.unwrap() <= done.stop.unwrap());
    }

    #[tokio::test]
    async fn test_command_nonzero_is_failure() {
        let mut work = Work::new("t1", "local", "tester");
        work.command = Some(vec!["sh".to_string(), "-c".to_string(), "exit 7".to_string()]);

        let queue = MockQueue::with_work(vec![work]);
        let (_tx, rx) = shutdown_pair();
        let mut lifecycle =
            Lifecycle::new(config("t1", 1), queue.clone(), Arc::new(Registry::new()), rx);
        lifecycle.run().await.unwrap();

        let done = queue.last();
        assert_eq!(done.status, WorkStatus::Failure);
        assert_eq!(done.results.as_ref().unwrap()["returncode"], json!(7));
    }

    #[tokio::test]
    async fn test_timeout_bounds() {
        let mut work = Work::new("t1", "local", "tester");
        work.command = Some(vec!["sleep".to_string(), "10".to_string()]);
        work.timeout = 1;

        let queue = MockQueue::with_work(vec![work]);
        let (_tx, rx) = shutdown_pair();
        let mut lifecycle =
            Lifecycle::new(config("t1", 1), queue.clone(), Arc::new(Registry::new()), rx);
        lifecycle.run().await.unwrap();

        let done = queue.last();
        assert_eq!(done.status, WorkStatus::Failure);
        let elapsed = done.elapsed().unwrap();
        assert!((1.0..=6.0).contains(&elapsed), "elapsed {elapsed}");
        assert!(done.results.as_ref().unwrap()["error"]
            .as_str()
            .unwrap()
            .contains("timeout"));
    }

    #[tokio::test]
    async fn test_empty_queue_is_idle() {
        let queue = MockQueue::with_work(vec![]);
        let (_tx, rx) = shutdown_pair();
        let mut lifecycle =
            Lifecycle::new(config("t1", 2), queue.clone(), Arc::new(Registry::new()), rx);
        let summary = lifecycle.run().await.unwrap();
        assert_eq!(summary.performed, 0);
        assert_eq!(summary.idle, 2);
        assert!(queue.updates().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_runners_never_share_work() {
        let mut work = Work::new("t1", "local", "tester");
        work.command = Some(vec!["true".to_string()]);
        let queue = MockQueue::with_work(vec![work]);

        let (_tx, rx) = shutdown_pair();
        let mut a = Lifecycle::new(config("t1", 2), queue.clone(), Arc::new(Registry::new()), rx.clone());
        let mut b = Lifecycle::new(config("t1", 2), queue.clone(), Arc::new(Registry::new()), rx);
        let (ra, rb) = tokio::join!(a.run(), b.run());

        let performed = ra.unwrap().performed + rb.unwrap().performed;
        assert_eq!(performed, 1);
        // exactly one runner stamped it running
        let running: Vec<_> = queue
            .updates()
            .iter()
            .filter(|w| w.status == WorkStatus::Running)
            .cloned()
            .collect();
        assert_eq!(running.len(), 1);
    }

    #[tokio::test]
    async fn test_attempt_bound_holds() {
        let mut work = Work::new("t1", "local", "tester");
        work.command = Some(vec!["true".to_string()]);
        work.retries = 2;
        let queue = MockQueue::with_work(vec![work]);
        let (_tx, rx) = shutdown_pair();
        let mut lifecycle =
            Lifecycle::new(config("t1", 1), queue.clone(), Arc::new(Registry::new()), rx);
        lifecycle.run().await.unwrap();
        for update in queue.updates() {
            assert!(update.attempt <= update.retries as u32 + 1);
        }
    }

    #[tokio::test]
    async fn test_static_command_overload_clears_function() {
        let mut work = Work::new("t1", "local", "tester");
        work.function = Some("tests.add".to_string());

        let queue = MockQueue::with_work(vec![work]);
        let (_tx, rx) = shutdown_pair();
        let mut cfg = config("t1", 1);
        cfg.command = Some(vec!["true".to_string()]);
        let mut lifecycle = Lifecycle::new(cfg, queue.clone(), Arc::new(Registry::new()), rx);
        lifecycle.run().await.unwrap();

        let done = queue.last();
        assert!(done.function.is_none());
        assert_eq!(done.status, WorkStatus::Success);
    }

    #[tokio::test]
    async fn test_shutdown_between_iterations() {
        let queue = MockQueue::with_work(vec![]);
        let (tx, rx) = shutdown_pair();
        tx.send(true).unwrap();
        let mut lifecycle =
            Lifecycle::new(config("t1", 0), queue.clone(), Arc::new(Registry::new()), rx);
        let summary = lifecycle.run().await.unwrap();
        assert_eq!(summary.performed + summary.idle, 0);
    }

    #[tokio::test]
    async fn test_neither_payload_fails() {
        let work = Work::new("t1", "local", "tester");
        let queue = MockQueue::with_work(vec![work]);
        let (_tx, rx) = shutdown_pair();
        let mut lifecycle =
            Lifecycle::new(config("t1", 1), queue.clone(), Arc::new(Registry::new()), rx);
        lifecycle.run().await.unwrap();
        let done = queue.last();
        assert_eq!(done.status, WorkStatus::Failure);
        assert!(done.results.as_ref().unwrap()["error"]
            .as_str()
            .unwrap()
            .contains("neither function nor command"));
    }
}
