//! Skein Transfer daemon binary
//!
//! Exit codes: 0 on graceful shutdown, 1 on misconfiguration, 2 on
//! unrecoverable backend failure.

use std::process::ExitCode;

use skein_client::Backends;
use skein_daemons::config::DaemonConfig;
use skein_daemons::transfer::TransferDaemon;
use skein_core::domain::workspace::Resolved;
use skein_core::Workspace;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skein_daemons=info,skein_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Skein Transfer Daemon");

    let config = match DaemonConfig::from_env().and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => config,
        Err(err) => {
            error!("misconfiguration: {err:#}");
            return ExitCode::from(1);
        }
    };

    let workspace = match load_workspace(config.workspace.as_deref()).await {
        Ok(workspace) => workspace,
        Err(err) => {
            error!("workspace resolution failed: {err:#}");
            return ExitCode::from(1);
        }
    };
    info!(workspace = %workspace.workspace, "workspace loaded");

    let backends = match Backends::from_workspace(&workspace) {
        Ok(backends) => backends,
        Err(err) => {
            error!("backend configuration failed: {err}");
            return ExitCode::from(1);
        }
    };

    if let Err(err) = backends.buckets.ping().await {
        error!("bucket service unreachable: {err}");
        return ExitCode::from(2);
    }
    if let Some(results) = &backends.results {
        if let Err(err) = results.ping().await {
            error!("results service unreachable: {err}");
            return ExitCode::from(2);
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx);

    let daemon = TransferDaemon::new(backends.buckets, backends.results, workspace, config);
    daemon.run(shutdown_rx).await;
    info!("transfer daemon stopped");
    ExitCode::SUCCESS
}

async fn load_workspace(spec: Option<&str>) -> anyhow::Result<Workspace> {
    match spec {
        None => Ok(Workspace::active()?),
        Some(spec) => match Workspace::resolve(spec)? {
            Resolved::Loaded(workspace) => Ok(workspace),
            Resolved::Url(url) => Ok(skein_client::fetch_workspace(&url).await?),
        },
    }
}

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
        }
        let _ = shutdown.send(true);
    });
}
