//! DTOs for inter-service communication

use serde::{Deserialize, Serialize};

use crate::domain::work::WorkStatus;

/// Filter applied when withdrawing work from the bucket service.
///
/// When several items match, the service returns the highest-priority,
/// oldest-creation item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WithdrawFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

/// Listing query the daemons reconcile against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViewQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkStatus>,
    /// Only items created before this Unix timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_before: Option<f64>,
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

/// Counts reported by one transfer daemon cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub transferred: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Counts reported by one audit daemon cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub expired: usize,
    pub stale: usize,
    pub orphaned: usize,
}
