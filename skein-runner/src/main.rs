//! Skein Runner binary
//!
//! Withdraws work from the bucket service and executes it until its
//! lifetime is spent or a termination signal arrives.
//!
//! Exit codes: 0 on graceful shutdown, 1 on misconfiguration, 2 on
//! unrecoverable backend failure.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use skein_client::Backends;
use skein_core::domain::workspace::Resolved;
use skein_core::Workspace;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skein_runner::config::RunnerConfig;
use skein_runner::lifecycle::Lifecycle;
use skein_runner::registry::Registry;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skein_runner=info,skein_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Skein Runner");

    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            error!("misconfiguration: {err:#}");
            return ExitCode::from(1);
        }
    };
    info!(
        runner_id = %config.runner_id,
        pipeline = %config.pipeline,
        site = %config.site,
        "loaded configuration"
    );

    let workspace = match load_workspace(&config).await {
        Ok(workspace) => workspace,
        Err(err) => {
            error!("workspace resolution failed: {err:#}");
            return ExitCode::from(1);
        }
    };
    info!(workspace = %workspace.workspace, "workspace loaded");

    if !workspace.allows_site(&config.site) {
        error!(
            "site {} is not allowed by workspace {}",
            config.site, workspace.workspace
        );
        return ExitCode::from(1);
    }

    let backends = match Backends::from_workspace(&workspace) {
        Ok(backends) => backends,
        Err(err) => {
            error!("backend configuration failed: {err}");
            return ExitCode::from(1);
        }
    };

    if let Err(err) = connect_with_retry(&backends).await {
        error!("bucket service unreachable: {err}");
        return ExitCode::from(2);
    }

    // user tasks register here at process start; the shipped binary
    // handles command work only
    let registry = Arc::new(Registry::new());
    if registry.is_empty() {
        info!("no tasks registered, function work will be rejected");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx);

    let mut lifecycle = Lifecycle::new(
        config,
        Arc::new(backends.buckets),
        registry,
        shutdown_rx,
    );

    match lifecycle.run().await {
        Ok(summary) => {
            info!(
                performed = summary.performed,
                idle = summary.idle,
                "runner lifecycle complete"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("unrecoverable backend failure: {err}");
            ExitCode::from(2)
        }
    }
}

/// Loads and validates the runner configuration from the environment.
fn load_config() -> anyhow::Result<RunnerConfig> {
    let config = RunnerConfig::from_env().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Resolves the configured workspace specifier, falling back to the
/// active workspace.
async fn load_workspace(config: &RunnerConfig) -> anyhow::Result<Workspace> {
    match &config.workspace {
        None => Ok(Workspace::active()?),
        Some(spec) => match Workspace::resolve(spec)? {
            Resolved::Loaded(workspace) => Ok(workspace),
            Resolved::Url(url) => Ok(skein_client::fetch_workspace(&url).await?),
        },
    }
}

/// Waits for the bucket service to come up, common when the runner and
/// backends start together in one deployment.
async fn connect_with_retry(backends: &Backends) -> skein_client::Result<()> {
    let policy = skein_client::RetryPolicy::default();
    skein_client::retry(&policy, || backends.buckets.ping()).await?;
    info!("bucket service reachable");
    Ok(())
}

/// Flags shutdown on SIGINT or SIGTERM; in-flight work is recorded as
/// interrupted by the lifecycle.
fn spawn_signal_handler(shutdown: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut terminate =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => info!("received SIGINT"),
                _ = terminate.recv() => info!("received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received interrupt");
        }
        if shutdown.send(true).is_err() {
            warn!("lifecycle already gone, exiting");
        }
    });
}
