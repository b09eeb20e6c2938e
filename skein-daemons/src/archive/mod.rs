//! Artifact archival
//!
//! Applies a work item's archive configuration to its plots and products
//! under the workspace's per-class policy. Filesystem modes (copy, move,
//! delete) run against the site's POSIX archive root; upload targets the
//! site's object store. The per-work target path embeds the unique work
//! id, so concurrent daemon instances cannot collide.

pub mod object;
pub mod posix;

use std::path::PathBuf;

use skein_core::domain::workspace::{ClassPolicy, StorageKind, Workspace};
use skein_core::{ArchiveMode, Work};
use thiserror::Error;
use tracing::{debug, info};

use crate::archive::object::ObjectStore;

/// A workspace policy violation. Fatal to the whole daemon batch.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("archive method {mode} not allowed for {class} by the workspace")]
    ModeNotAllowed { class: &'static str, mode: ArchiveMode },

    #[error("no archive policy configured for {class}")]
    Unconfigured { class: &'static str },

    #[error("no POSIX archive root declared for site {site}")]
    MissingArchiveRoot { site: String },

    #[error("no object store declared for site {site}")]
    MissingObjectStore { site: String },

    #[error("archive method {mode} does not apply to {storage:?} storage")]
    ModeStorageMismatch { mode: ArchiveMode, storage: StorageKind },
}

/// Why one work item's artifacts could not be archived.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Aborts the batch.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// Isolated to the item: the item stays terminal but is not
    /// forwarded.
    #[error("missing source file {0}")]
    MissingSource(String),

    #[error("archive I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("object store upload failed: {0}")]
    Upload(String),
}

impl ArchiveError {
    /// True when this failure must abort the whole batch.
    pub fn is_policy(&self) -> bool {
        matches!(self, ArchiveError::Policy(_))
    }
}

/// Archives one work item's plots and products per workspace policy.
///
/// Successful filesystem and upload modes rewrite the artifact entries to
/// their archived locations. Returns whether anything changed on disk.
pub async fn run(work: &mut Work, workspace: &Workspace) -> Result<bool, ArchiveError> {
    let mut changed = false;

    let plots_mode = work.config.archive.plots;
    if let Some(mut plots) = work.plots.take() {
        let outcome = archive_class(
            "plots",
            plots_mode,
            workspace.config.archive.plots.as_ref(),
            &mut plots,
            work,
            workspace,
        )
        .await;
        work.plots = Some(plots);
        changed |= outcome?;
    }

    let products_mode = work.config.archive.products;
    if let Some(mut products) = work.products.take() {
        let outcome = archive_class(
            "products",
            products_mode,
            workspace.config.archive.products.as_ref(),
            &mut products,
            work,
            workspace,
        )
        .await;
        work.products = Some(products);
        changed |= outcome?;
    }

    if changed {
        if let Some(group) = &workspace.config.archive.permissions {
            if let Some(root) = workspace.posix_root(&work.site) {
                let path = target_path(root.clone(), work);
                posix::permissions(&path, group).await;
            }
        }
    }

    Ok(changed)
}

async fn archive_class(
    class: &'static str,
    mode: ArchiveMode,
    policy: Option<&ClassPolicy>,
    payload: &mut Vec<String>,
    work: &Work,
    workspace: &Workspace,
) -> Result<bool, ArchiveError> {
    if payload.is_empty() || mode == ArchiveMode::Bypass {
        debug!(class, %mode, "nothing to archive");
        return Ok(false);
    }

    let policy = policy.ok_or(PolicyError::Unconfigured { class })?;
    if !policy.allows(mode) {
        return Err(PolicyError::ModeNotAllowed { class, mode }.into());
    }

    match (mode, policy.storage) {
        (ArchiveMode::Delete, _) => {
            posix::delete(payload)?;
        }
        (ArchiveMode::Copy, StorageKind::Posix) | (ArchiveMode::Move, StorageKind::Posix) => {
            let root = workspace
                .posix_root(&work.site)
                .ok_or_else(|| PolicyError::MissingArchiveRoot {
                    site: work.site.clone(),
                })?;
            let dest = target_path(root.clone(), work).join(class);
            if mode == ArchiveMode::Copy {
                posix::copy(&dest, payload)?;
            } else {
                posix::relocate(&dest, payload)?;
            }
        }
        (ArchiveMode::Upload, StorageKind::S3) => {
            let site = workspace
                .s3_site(&work.site)
                .ok_or_else(|| PolicyError::MissingObjectStore {
                    site: work.site.clone(),
                })?;
            let store = ObjectStore::new(site);
            let prefix = object_key_prefix(site.subpath.as_str(), work);
            store.upload(&prefix, payload).await?;
        }
        (mode, storage) => {
            return Err(PolicyError::ModeStorageMismatch { mode, storage }.into());
        }
    }

    info!(class, %mode, id = ?work.id, "archived");
    Ok(true)
}

/// `<root>/<pipeline>/<id>/`
fn target_path(root: PathBuf, work: &Work) -> PathBuf {
    root.join(&work.pipeline)
        .join(work.id.as_deref().unwrap_or("unassigned"))
}

/// `<subpath>/<pipeline>/<id>`
fn object_key_prefix(subpath: &str, work: &Work) -> String {
    let id = work.id.as_deref().unwrap_or("unassigned");
    if subpath.is_empty() {
        format!("{}/{}", work.pipeline, id)
    } else {
        format!("{}/{}/{}", subpath, work.pipeline, id)
    }
}
