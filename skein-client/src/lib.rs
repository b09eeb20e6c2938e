//! Skein HTTP Clients
//!
//! Type-safe clients for the backend services the Skein core talks to:
//! the bucket queue, the results store and the pipelines manager. Each
//! client rides the shared [`Transport`]: candidate baseurls, healthcheck
//! driven selection, bounded socket timeouts and exponential-backoff
//! retries on transient failures.
//!
//! # Example
//!
//! ```no_run
//! use skein_client::Backends;
//! use skein_core::Workspace;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let workspace = Workspace::active()?;
//! let backends = Backends::from_workspace(&workspace)?;
//! let ids = backends.buckets.deposit(&[]).await?;
//! println!("deposited: {ids:?}");
//! # Ok(())
//! # }
//! ```

pub mod buckets;
pub mod error;
pub mod pipelines;
pub mod results;
pub mod transport;

pub use buckets::Buckets;
pub use error::{ClientError, Result};
pub use pipelines::{Kind, Pipelines};
pub use results::Results;
pub use transport::{retry, RetryPolicy, Transport};

use skein_core::{Workspace, WorkspaceError};

/// The backend clients a workspace declares, constructed once at startup
/// and passed explicitly to whatever needs them.
#[derive(Debug)]
pub struct Backends {
    pub buckets: Buckets,
    pub results: Option<Results>,
    pub pipelines: Option<Pipelines>,
}

impl Backends {
    /// Builds clients from the workspace's declared baseurls. The bucket
    /// service is mandatory; results and pipelines are optional.
    pub fn from_workspace(workspace: &Workspace) -> Result<Self> {
        let bucket_urls = workspace.bucket_baseurls();
        if bucket_urls.is_empty() {
            return Err(ClientError::NotConfigured("buckets"));
        }
        let results = match workspace.results_baseurls() {
            urls if urls.is_empty() => None,
            urls => Some(Results::new(urls)?),
        };
        let pipelines = match workspace.pipelines_baseurls() {
            urls if urls.is_empty() => None,
            urls => Some(Pipelines::new(urls)?),
        };
        Ok(Self {
            buckets: Buckets::new(bucket_urls)?,
            results,
            pipelines,
        })
    }

    /// The results client, or an error when the workspace declares none.
    pub fn results(&self) -> Result<&Results> {
        self.results.as_ref().ok_or(ClientError::NotConfigured("results"))
    }

    /// The pipelines client, or an error when the workspace declares none.
    pub fn pipelines(&self) -> Result<&Pipelines> {
        self.pipelines
            .as_ref()
            .ok_or(ClientError::NotConfigured("pipelines"))
    }
}

/// Fetches a workspace document from a URL.
///
/// Completes [`Workspace::resolve`], which hands URL specifiers back to
/// the caller so the core crate stays free of HTTP.
pub async fn fetch_workspace(url: &str) -> std::result::Result<Workspace, WorkspaceError> {
    let body = reqwest::get(url)
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|err| WorkspaceError::NotFound(format!("{url}: {err}")))?
        .text()
        .await
        .map_err(|err| WorkspaceError::NotFound(format!("{url}: {err}")))?;
    Workspace::from_yaml(&body)
}
