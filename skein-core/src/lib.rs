//! Skein Core
//!
//! Core types and abstractions for the Skein work orchestration system.
//!
//! This crate contains:
//! - Domain types: Work, Workspace, and Pipeline Configuration documents
//! - Validation: schema rules, normalization, and default population for Work
//! - Expansion: matrix expansion of Pipeline Configurations into Work items

pub mod domain;
pub mod dto;
pub mod error;
pub mod expand;
pub mod merge;
pub mod validate;

pub use domain::config::{Configuration, Schedule, Step};
pub use domain::work::{ArchiveMode, Work, WorkStatus};
pub use domain::workspace::Workspace;
pub use error::{ConfigError, WorkspaceError};
pub use validate::{Strategy, ValidationError};
