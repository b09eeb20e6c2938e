//! Skein Runner
//!
//! A stateless worker that withdraws work from the bucket service and
//! executes it: either a subprocess for `command` work, or a registered
//! callable for `function` work.
//!
//! Architecture:
//! - Configuration: settings from environment variables
//! - Registry: named callables user code registers at process start
//! - Execution: subprocess and callable dispatch with timeout enforcement
//! - Lifecycle: the withdraw/execute/update loop with graceful shutdown
//!
//! The crate is a library so embedders can register their own tasks and
//! drive [`lifecycle::Lifecycle`] from their own binary; the shipped
//! `skein-runner` binary handles command work out of the box.

pub mod config;
pub mod execute;
pub mod lifecycle;
pub mod registry;
