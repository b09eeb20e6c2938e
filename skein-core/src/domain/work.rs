//! Work domain types
//!
//! Structure shared between the bucket service (persists), the runner
//! (executes and updates) and the daemons (archive and audit).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Returns the current Unix time in fractional seconds.
///
/// Lifecycle timestamps on [`Work`] are epoch seconds so they survive
/// round-trips through the bucket and results services unchanged.
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}

/// Work lifecycle status.
///
/// Terminal states are final: the runner never re-mutates them, only the
/// daemons and the bucket service may act on them afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkStatus {
    Created,
    Queued,
    Running,
    Success,
    Failure,
    Cancelled,
    Expired,
}

impl WorkStatus {
    /// True for `success`, `failure`, `cancelled` and `expired`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkStatus::Success | WorkStatus::Failure | WorkStatus::Cancelled | WorkStatus::Expired
        )
    }
}

impl std::fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkStatus::Created => "created",
            WorkStatus::Queued => "queued",
            WorkStatus::Running => "running",
            WorkStatus::Success => "success",
            WorkStatus::Failure => "failure",
            WorkStatus::Cancelled => "cancelled",
            WorkStatus::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// How an artifact class is committed to the archive tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveMode {
    /// Leave the artifacts where they are.
    Bypass,
    /// Duplicate into the archive, source kept.
    Copy,
    /// Relocate into the archive.
    Move,
    /// Remove the artifacts without archiving.
    Delete,
    /// Upload to the site's object store.
    Upload,
}

impl std::fmt::Display for ArchiveMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ArchiveMode::Bypass => "bypass",
            ArchiveMode::Copy => "copy",
            ArchiveMode::Move => "move",
            ArchiveMode::Delete => "delete",
            ArchiveMode::Upload => "upload",
        };
        f.write_str(name)
    }
}

/// Per-work archive strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Forward results to the results service when terminal.
    #[serde(default = "default_true")]
    pub results: bool,
    /// Archive strategy for data products.
    #[serde(default = "default_copy")]
    pub products: ArchiveMode,
    /// Archive strategy for plots.
    #[serde(default = "default_copy")]
    pub plots: ArchiveMode,
}

fn default_true() -> bool {
    true
}

fn default_copy() -> ArchiveMode {
    ArchiveMode::Copy
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            results: true,
            products: ArchiveMode::Copy,
            plots: ArchiveMode::Copy,
        }
    }
}

/// Work configuration attributes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkConfig {
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Id of the pipeline configuration execution that created this work,
    /// when it was expanded from one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

/// Slack notification settings.
///
/// The `reply` flag is forwarded verbatim; its semantics belong to the
/// external notification service.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SlackNotify {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub results: bool,
    #[serde(default)]
    pub products: bool,
    #[serde(default)]
    pub plots: bool,
    #[serde(default)]
    pub reply: bool,
}

impl SlackNotify {
    /// True when any destination is configured.
    pub fn is_active(&self) -> bool {
        self.channel_id.is_some() || self.member_ids.is_some()
    }
}

/// Notification configuration of the work.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Notify {
    #[serde(default)]
    pub slack: SlackNotify,
}

/// The atomic unit of deferred computation.
///
/// A work item names either an importable function (a registry key looked
/// up by the runner) or a shell command, together with its parameters,
/// execution controls, captured outputs, and lifecycle timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Work {
    /// Id assigned by the bucket service on deposit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Name of the pipeline this work belongs to. Hyphen-case.
    pub pipeline: String,
    /// Site where the work may be performed. Must be a workspace site.
    pub site: String,
    /// User who created the work.
    pub user: String,

    /// Registry key of the function to run as `function(parameters)`.
    /// Mutually exclusive with `command`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Argv to run as a subprocess. Mutually exclusive with `function`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// Parameters passed to the function.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,

    /// Results of the work performed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Map<String, Value>>,
    /// Paths of non-human-readable data products generated by the work.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub products: Option<Vec<String>>,
    /// Paths of visual data products generated by the work.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plots: Option<Vec<String>>,

    /// Event ids the work was performed against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Vec<i64>>,
    /// Searchable tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Groups the work belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<Vec<String>>,

    /// Seconds before the execution is cancelled. Range 1..=86400.
    #[serde(default = "default_timeout")]
    pub timeout: u32,
    /// Retries before the work is a final failure. Range 0..=5.
    #[serde(default = "default_retries")]
    pub retries: u8,
    /// Priority 1 (lowest) to 5 (highest); the bucket serves higher first.
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// Attempt count, incremented by the bucket on each withdrawal.
    #[serde(default)]
    pub attempt: u32,

    /// Unix timestamp of deposit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation: Option<f64>,
    /// Unix timestamp of the current attempt's start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<f64>,
    /// Unix timestamp of the current attempt's stop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<f64>,

    #[serde(default = "default_status")]
    pub status: WorkStatus,

    #[serde(default)]
    pub config: WorkConfig,
    #[serde(default)]
    pub notify: Notify,

    /// Fields the schema does not know. Preserved by relaxed validation,
    /// rejected by strict validation.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_timeout() -> u32 {
    3600
}

fn default_retries() -> u8 {
    2
}

fn default_priority() -> u8 {
    3
}

fn default_status() -> WorkStatus {
    WorkStatus::Created
}

impl Work {
    /// Creates a work item with defaults for everything but its identity.
    pub fn new(pipeline: impl Into<String>, site: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            id: None,
            pipeline: pipeline.into(),
            site: site.into(),
            user: user.into(),
            function: None,
            command: None,
            parameters: None,
            results: None,
            products: None,
            plots: None,
            event: None,
            tags: None,
            group: None,
            timeout: default_timeout(),
            retries: default_retries(),
            priority: default_priority(),
            attempt: 0,
            creation: Some(unix_now()),
            start: None,
            stop: None,
            status: WorkStatus::Created,
            config: WorkConfig::default(),
            notify: Notify::default(),
            extra: Map::new(),
        }
    }

    /// True once the work has reached a final status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True when the work has exhausted its retry budget.
    pub fn retries_exhausted(&self) -> bool {
        self.attempt > self.retries as u32
    }

    /// Records an error message under `results.error`.
    pub fn record_error(&mut self, message: impl Into<String>) {
        let results = self.results.get_or_insert_with(Map::new);
        results.insert("error".to_string(), Value::String(message.into()));
    }

    /// Wall-clock duration of the last attempt, when both stamps are set.
    pub fn elapsed(&self) -> Option<f64> {
        match (self.start, self.stop) {
            (Some(start), Some(stop)) => Some(stop - start),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_work_defaults() {
        let work = Work::new("sample", "local", "tester");
        assert_eq!(work.timeout, 3600);
        assert_eq!(work.retries, 2);
        assert_eq!(work.priority, 3);
        assert_eq!(work.attempt, 0);
        assert_eq!(work.status, WorkStatus::Created);
        assert!(work.creation.is_some());
        assert!(work.config.archive.results);
        assert_eq!(work.config.archive.products, ArchiveMode::Copy);
    }

    #[test]
    fn test_status_terminality() {
        assert!(!WorkStatus::Created.is_terminal());
        assert!(!WorkStatus::Queued.is_terminal());
        assert!(!WorkStatus::Running.is_terminal());
        assert!(WorkStatus::Success.is_terminal());
        assert!(WorkStatus::Failure.is_terminal());
        assert!(WorkStatus::Cancelled.is_terminal());
        assert!(WorkStatus::Expired.is_terminal());
    }

    #[test]
    fn test_status_wire_format_is_lowercase() {
        let json = serde_json::to_string(&WorkStatus::Success).unwrap();
        assert_eq!(json, "\"success\"");
        let mode = serde_json::to_string(&ArchiveMode::Bypass).unwrap();
        assert_eq!(mode, "\"bypass\"");
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut work = Work::new("sample", "local", "tester");
        work.function = Some("tasks.add".to_string());
        work.parameters = Some(
            serde_json::from_str(r#"{"a": 1, "b": 2}"#).unwrap(),
        );
        work.event = Some(vec![9385707]);
        let json = serde_json::to_string(&work).unwrap();
        let back: Work = serde_json::from_str(&json).unwrap();
        assert_eq!(work, back);
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let work: Work = serde_json::from_str(
            r#"{"pipeline": "sample", "site": "local", "user": "tester"}"#,
        )
        .unwrap();
        assert_eq!(work.timeout, 3600);
        assert_eq!(work.status, WorkStatus::Created);
        assert!(work.function.is_none());
    }

    #[test]
    fn test_record_error_creates_results() {
        let mut work = Work::new("sample", "local", "tester");
        assert!(work.results.is_none());
        work.record_error("boom");
        assert_eq!(
            work.results.unwrap().get("error").unwrap(),
            &Value::String("boom".to_string())
        );
    }

    #[test]
    fn test_retries_exhausted() {
        let mut work = Work::new("sample", "local", "tester");
        work.retries = 2;
        work.attempt = 2;
        assert!(!work.retries_exhausted());
        work.attempt = 3;
        assert!(work.retries_exhausted());
    }

    #[test]
    fn test_elapsed() {
        let mut work = Work::new("sample", "local", "tester");
        assert!(work.elapsed().is_none());
        work.start = Some(100.0);
        work.stop = Some(104.5);
        assert_eq!(work.elapsed(), Some(4.5));
    }
}
