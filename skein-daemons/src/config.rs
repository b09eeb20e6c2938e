//! Daemon configuration

use std::time::Duration;

/// Configuration shared by the transfer and audit daemons.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Workspace specifier: path, URL or name. Empty means the active
    /// workspace.
    pub workspace: Option<String>,

    /// Time between reconciliation cycles.
    pub period: Duration,

    /// Work items handled per pipeline per cycle.
    pub batch_size: usize,

    /// Age before the audit daemon acts on an item.
    pub buffer: Duration,

    /// Pipelines to reconcile; empty means every pipeline in the bucket.
    pub pipelines: Vec<String>,
}

impl DaemonConfig {
    /// Creates configuration from environment variables.
    ///
    /// Expected environment variables:
    /// - SKEIN_WORKSPACE (optional, path/URL/name; default: active workspace)
    /// - SKEIN_PERIOD (optional, seconds, default: 30)
    /// - SKEIN_BATCH (optional, default: 50)
    /// - SKEIN_BUFFER (optional, seconds, default: 3600)
    /// - SKEIN_PIPELINES (optional, comma-separated, default: all)
    pub fn from_env() -> anyhow::Result<Self> {
        let period = std::env::var("SKEIN_PERIOD")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        let batch_size = std::env::var("SKEIN_BATCH")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(50);

        let buffer = std::env::var("SKEIN_BUFFER")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(3600));

        let pipelines = std::env::var("SKEIN_PIPELINES")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            workspace: std::env::var("SKEIN_WORKSPACE").ok(),
            period,
            batch_size,
            buffer,
            pipelines,
        })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.period.is_zero() {
            anyhow::bail!("period must be greater than 0");
        }
        if self.batch_size == 0 {
            anyhow::bail!("batch size must be greater than 0");
        }
        Ok(())
    }

    /// Pipelines to reconcile, as view filters: `None` scans every
    /// pipeline in one pass.
    pub fn pipeline_filters(&self) -> Vec<Option<String>> {
        if self.pipelines.is_empty() {
            vec![None]
        } else {
            self.pipelines.iter().cloned().map(Some).collect()
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            workspace: None,
            period: Duration::from_secs(30),
            batch_size: 50,
            buffer: Duration::from_secs(3600),
            pipelines: Vec::new(),
        }
    }
}
