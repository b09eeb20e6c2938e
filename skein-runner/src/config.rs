//! Runner configuration
//!
//! All knobs come from environment variables with sane defaults, so the
//! runner deploys cleanly into containers without a config file.

use std::time::Duration;

use skein_core::dto::WithdrawFilter;

/// Whether a task receives keyword parameters or the whole work object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArgSource {
    #[default]
    Parameters,
    Work,
}

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Unique identifier for this runner instance
    pub runner_id: String,

    /// Pipeline to withdraw work from (required)
    pub pipeline: String,

    /// Site this runner executes at (required)
    pub site: String,

    /// Workspace specifier: path, URL or name. Empty means the active
    /// workspace.
    pub workspace: Option<String>,

    /// Withdraw-filter tags
    pub tags: Vec<String>,

    /// Withdraw-filter parent pipeline id
    pub parent: Option<String>,

    /// Static function overload: every withdrawn work runs this callable
    pub function: Option<String>,

    /// Static command overload: every withdrawn work runs this argv
    pub command: Option<Vec<String>>,

    /// Iterations before exiting; 0 means run forever
    pub lifetime: u64,

    /// Sleep between iterations
    pub sleep_interval: Duration,

    /// How tasks receive their input
    pub arg_source: ArgSource,
}

impl RunnerConfig {
    /// Creates configuration from environment variables.
    ///
    /// Expected environment variables:
    /// - SKEIN_PIPELINE (required)
    /// - SKEIN_SITE (required)
    /// - SKEIN_WORKSPACE (optional, path/URL/name; default: active workspace)
    /// - SKEIN_TAGS (optional, comma-separated)
    /// - SKEIN_PARENT (optional)
    /// - SKEIN_FUNCTION / SKEIN_COMMAND (optional overloads)
    /// - SKEIN_LIFETIME (optional, iterations, default: 0 = infinite)
    /// - SKEIN_SLEEP (optional, seconds, default: 30)
    /// - SKEIN_ARG_SOURCE (optional, "parameters" or "work")
    pub fn from_env() -> anyhow::Result<Self> {
        let pipeline = std::env::var("SKEIN_PIPELINE")
            .map_err(|_| anyhow::anyhow!("SKEIN_PIPELINE environment variable not set"))?;
        let site = std::env::var("SKEIN_SITE")
            .map_err(|_| anyhow::anyhow!("SKEIN_SITE environment variable not set"))?;

        let tags = std::env::var("SKEIN_TAGS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let command = std::env::var("SKEIN_COMMAND")
            .ok()
            .map(|raw| raw.split_whitespace().map(String::from).collect());

        let lifetime = std::env::var("SKEIN_LIFETIME")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        let sleep_interval = std::env::var("SKEIN_SLEEP")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        let arg_source = match std::env::var("SKEIN_ARG_SOURCE").ok().as_deref() {
            Some("work") => ArgSource::Work,
            _ => ArgSource::Parameters,
        };

        Ok(Self {
            runner_id: std::env::var("SKEIN_RUNNER_ID")
                .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string()),
            pipeline,
            site,
            workspace: std::env::var("SKEIN_WORKSPACE").ok(),
            tags,
            parent: std::env::var("SKEIN_PARENT").ok(),
            function: std::env::var("SKEIN_FUNCTION").ok(),
            command,
            lifetime,
            sleep_interval,
            arg_source,
        })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pipeline.is_empty() {
            anyhow::bail!("pipeline cannot be empty");
        }
        if self.site.is_empty() {
            anyhow::bail!("site cannot be empty");
        }
        if self.function.is_some() && self.command.is_some() {
            anyhow::bail!("function and command overloads cannot be set together");
        }
        if self.sleep_interval.is_zero() {
            anyhow::bail!("sleep interval must be greater than 0");
        }
        Ok(())
    }

    /// The withdraw filter this runner presents to the bucket service.
    pub fn filter(&self) -> WithdrawFilter {
        WithdrawFilter {
            site: Some(self.site.clone()),
            tags: (!self.tags.is_empty()).then(|| self.tags.clone()),
            parent: self.parent.clone(),
            ..Default::default()
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            runner_id: uuid::Uuid::new_v4().to_string(),
            pipeline: String::new(),
            site: "local".to_string(),
            workspace: None,
            tags: Vec::new(),
            parent: None,
            function: None,
            command: None,
            lifetime: 0,
            sleep_interval: Duration::from_secs(30),
            arg_source: ArgSource::Parameters,
        }
    }
}
