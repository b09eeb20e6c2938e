//! Skein Daemons
//!
//! Periodic reconciliation loops that maintain system invariants against
//! the bucket and results services:
//!
//! - Transfer: archives completed work's artifacts per workspace policy,
//!   forwards results, and deletes committed work from the queue.
//! - Audit: expires overdue work, flags stale failures, and cancels
//!   orphans whose pipeline configuration is gone.

pub mod archive;
pub mod audit;
pub mod config;
pub mod transfer;
