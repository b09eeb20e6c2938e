//! Error types for the core crate

use thiserror::Error;

/// Errors raised while loading or resolving a workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The workspace file could not be read.
    #[error("failed to read workspace {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The workspace document is not valid YAML or misses required keys.
    #[error("invalid workspace document: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// No workspace matched the given name, path or URL.
    #[error("workspace not found: {0}")]
    NotFound(String),

    /// No active workspace is configured. Fatal at startup.
    #[error("no active workspace; activate one under {0}")]
    NoActiveWorkspace(String),
}

/// Errors raised while parsing or expanding a pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document is not valid YAML or carries unknown top-level keys.
    #[error("invalid configuration document: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Semantic violations, aggregated over the whole document.
    #[error("configuration rejected: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl ConfigError {
    /// All violation messages, or the parse error as a single entry.
    pub fn violations(&self) -> Vec<String> {
        match self {
            ConfigError::Parse(err) => vec![err.to_string()],
            ConfigError::Invalid(violations) => violations.clone(),
        }
    }
}
