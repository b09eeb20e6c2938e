//! Workspace configuration
//!
//! A workspace resolves a named environment into service endpoints, allowed
//! sites, archive storage and policy, and logging sinks. It is loaded once
//! at process start and passed explicitly to everything that needs it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::work::ArchiveMode;
use crate::error::WorkspaceError;

/// Directory holding named workspace documents, relative to `$HOME`.
pub const WORKSPACE_DIR: &str = ".workflow/workspaces";

/// File name of the persisted active workspace.
pub const ACTIVE_WORKSPACE: &str = "active.yml";

/// A baseurl entry that is either a single URL or a candidate list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    /// The candidate URLs in declaration order.
    pub fn as_vec(&self) -> Vec<String> {
        match self {
            OneOrMany::One(url) => vec![url.clone()],
            OneOrMany::Many(urls) => urls.clone(),
        }
    }
}

/// Base URLs of the backend services a workspace talks to.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Baseurls {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buckets: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipelines: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loki: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub products: Option<OneOrMany>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Http {
    #[serde(default)]
    pub baseurls: Baseurls,
}

/// Per-site object store coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3Site {
    pub url: String,
    pub bucket: String,
    #[serde(default)]
    pub subpath: String,
}

/// Archive storage tiers, keyed by site.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ArchiveStorage {
    /// Site archive roots on a shared POSIX filesystem.
    #[serde(default)]
    pub posix: HashMap<String, PathBuf>,
    /// Site object store endpoints.
    #[serde(default)]
    pub s3: HashMap<String, S3Site>,
}

/// Which storage tier an artifact class archives to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Posix,
    S3,
}

/// Workspace policy for one artifact class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassPolicy {
    pub storage: StorageKind,
    /// Archive modes the workspace permits for this class.
    pub methods: Vec<ArchiveMode>,
}

impl ClassPolicy {
    /// True when the given mode is permitted for this class.
    pub fn allows(&self, mode: ArchiveMode) -> bool {
        self.methods.contains(&mode)
    }
}

/// Workspace-wide archival policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivePolicy {
    /// Whether terminal results are forwarded to the results service.
    #[serde(default = "default_true")]
    pub results: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plots: Option<ClassPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub products: Option<ClassPolicy>,
    /// POSIX group granted read access on archived paths.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for ArchivePolicy {
    fn default() -> Self {
        Self {
            results: true,
            plots: None,
            products: None,
            permissions: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub archive: ArchivePolicy,
}

/// The ambient configuration identifying services, sites, storage and
/// policies for one deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    /// Name describing the purpose of the workspace.
    pub workspace: String,
    /// Sites where work belonging to this workspace may be performed.
    pub sites: Vec<String>,
    #[serde(default)]
    pub http: Http,
    #[serde(default)]
    pub archive: ArchiveStorage,
    #[serde(default)]
    pub config: WorkspaceConfig,
}

impl Workspace {
    /// Parses a workspace from a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, WorkspaceError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Loads a workspace from a file path.
    pub fn from_path(path: &Path) -> Result<Self, WorkspaceError> {
        let contents = std::fs::read_to_string(path).map_err(|source| WorkspaceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    /// Resolves a workspace specifier.
    ///
    /// Precedence: an existing file path, then a URL (handed back to the
    /// caller, fetching lives with the HTTP client crate), then a name
    /// looked up under `~/.workflow/workspaces/<name>.yml`.
    pub fn resolve(spec: &str) -> Result<Resolved, WorkspaceError> {
        let path = Path::new(spec);
        if path.exists() {
            debug!(path = %path.display(), "resolved workspace from path");
            return Ok(Resolved::Loaded(Self::from_path(path)?));
        }
        if spec.starts_with("http://") || spec.starts_with("https://") {
            return Ok(Resolved::Url(spec.to_string()));
        }
        let named = workspace_dir().join(format!("{spec}.yml"));
        if named.exists() {
            debug!(path = %named.display(), "resolved workspace by name");
            return Ok(Resolved::Loaded(Self::from_path(&named)?));
        }
        Err(WorkspaceError::NotFound(spec.to_string()))
    }

    /// Loads the persisted active workspace.
    ///
    /// A missing active workspace is a fatal startup condition for every
    /// process in the system.
    pub fn active() -> Result<Self, WorkspaceError> {
        let path = workspace_dir().join(ACTIVE_WORKSPACE);
        if !path.exists() {
            return Err(WorkspaceError::NoActiveWorkspace(
                workspace_dir().display().to_string(),
            ));
        }
        Self::from_path(&path)
    }

    /// True when `site` is allowed by this workspace.
    pub fn allows_site(&self, site: &str) -> bool {
        self.sites.iter().any(|s| s == site)
    }

    /// Candidate baseurls for the bucket service.
    pub fn bucket_baseurls(&self) -> Vec<String> {
        self.http
            .baseurls
            .buckets
            .as_ref()
            .map(OneOrMany::as_vec)
            .unwrap_or_default()
    }

    /// Candidate baseurls for the results service.
    pub fn results_baseurls(&self) -> Vec<String> {
        self.http
            .baseurls
            .results
            .as_ref()
            .map(OneOrMany::as_vec)
            .unwrap_or_default()
    }

    /// Candidate baseurls for the pipelines manager service.
    pub fn pipelines_baseurls(&self) -> Vec<String> {
        self.http
            .baseurls
            .pipelines
            .as_ref()
            .map(OneOrMany::as_vec)
            .unwrap_or_default()
    }

    /// The POSIX archive root for a site, when one is declared.
    pub fn posix_root(&self, site: &str) -> Option<&PathBuf> {
        self.archive.posix.get(site)
    }

    /// The object store coordinates for a site, when declared.
    pub fn s3_site(&self, site: &str) -> Option<&S3Site> {
        self.archive.s3.get(site)
    }
}

/// Outcome of [`Workspace::resolve`].
#[derive(Debug, Clone)]
pub enum Resolved {
    /// The document was found locally and parsed.
    Loaded(Workspace),
    /// The specifier is a URL; fetch it with the client crate.
    Url(String),
}

fn workspace_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(WORKSPACE_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
workspace: demo
sites: [local, apex]
http:
  baseurls:
    buckets: ["http://localhost:8004", "http://fallback:8004"]
    results: http://localhost:8005
    pipelines: http://localhost:8006
archive:
  posix:
    local: /tmp/archive
  s3:
    apex:
      url: http://objects.apex:9000
      bucket: skein
      subpath: archive
config:
  archive:
    results: true
    products:
      storage: posix
      methods: [bypass, copy, move, delete]
    plots:
      storage: s3
      methods: [upload, bypass]
    permissions: skein-ro
"#;

    #[test]
    fn test_parse_workspace() {
        let ws = Workspace::from_yaml(SAMPLE).unwrap();
        assert_eq!(ws.workspace, "demo");
        assert!(ws.allows_site("local"));
        assert!(!ws.allows_site("elsewhere"));
        assert_eq!(
            ws.bucket_baseurls(),
            vec!["http://localhost:8004", "http://fallback:8004"]
        );
        assert_eq!(ws.results_baseurls(), vec!["http://localhost:8005"]);
        assert_eq!(ws.posix_root("local").unwrap(), &PathBuf::from("/tmp/archive"));
        let s3 = ws.s3_site("apex").unwrap();
        assert_eq!(s3.bucket, "skein");
    }

    #[test]
    fn test_class_policy_allows() {
        let ws = Workspace::from_yaml(SAMPLE).unwrap();
        let products = ws.config.archive.products.as_ref().unwrap();
        assert!(products.allows(ArchiveMode::Copy));
        assert!(!products.allows(ArchiveMode::Upload));
        let plots = ws.config.archive.plots.as_ref().unwrap();
        assert_eq!(plots.storage, StorageKind::S3);
        assert!(plots.allows(ArchiveMode::Upload));
    }

    #[test]
    fn test_missing_optional_sections() {
        let ws = Workspace::from_yaml("workspace: bare\nsites: [local]\n").unwrap();
        assert!(ws.bucket_baseurls().is_empty());
        assert!(ws.config.archive.plots.is_none());
        assert!(ws.posix_root("local").is_none());
    }

    #[test]
    fn test_resolve_path_precedence() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"workspace: fromfile\nsites: [local]\n").unwrap();
        let resolved = Workspace::resolve(file.path().to_str().unwrap()).unwrap();
        match resolved {
            Resolved::Loaded(ws) => assert_eq!(ws.workspace, "fromfile"),
            Resolved::Url(_) => panic!("expected a loaded workspace"),
        }
    }

    #[test]
    fn test_resolve_url() {
        let resolved = Workspace::resolve("https://example.com/ws.yml").unwrap();
        assert!(matches!(resolved, Resolved::Url(_)));
    }

    #[test]
    fn test_resolve_unknown_name() {
        let err = Workspace::resolve("no-such-workspace-name").unwrap_err();
        assert!(matches!(err, WorkspaceError::NotFound(_)));
    }
}
