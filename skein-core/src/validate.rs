//! Work validation
//!
//! Applies schema rules and the function/command discriminant to a raw
//! work payload, normalizes the pipeline name, resolves the site against
//! the workspace, and populates defaults. Every violation is collected;
//! the caller receives them all at once rather than the first failure.

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::domain::work::{unix_now, Work};
use crate::domain::workspace::Workspace;

/// How strictly a payload is held to the schema.
///
/// The strategy is configured per ingestion point: user-facing deposits
/// run strict, daemon reconciliation runs relaxed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Any violation rejects, unknown fields included.
    Strict,
    /// Unknown fields are preserved and reported as warnings.
    Relaxed,
}

/// A rejected payload, with every violation found.
#[derive(Debug, Error)]
#[error("invalid work: {}", .violations.join("; "))]
pub struct ValidationError {
    pub violations: Vec<String>,
}

/// A validated work item plus any warnings emitted along the way.
#[derive(Debug)]
pub struct Validated {
    pub work: Work,
    pub warnings: Vec<String>,
}

/// Validates a raw payload into a [`Work`].
pub fn work(
    raw: Value,
    workspace: &Workspace,
    strategy: Strategy,
) -> Result<Validated, ValidationError> {
    let mut violations: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    let mut work: Work = match serde_json::from_value(raw) {
        Ok(work) => work,
        Err(err) => {
            return Err(ValidationError {
                violations: vec![format!("payload does not match the work schema: {err}")],
            });
        }
    };

    match normalize_pipeline(&work.pipeline) {
        Ok(normalized) => {
            if normalized != work.pipeline {
                let message = format!("pipeline reformatted {} -> {}", work.pipeline, normalized);
                warn!("{message}");
                warnings.push(message);
                work.pipeline = normalized;
            }
        }
        Err(violation) => violations.push(violation),
    }

    if work.user.is_empty() {
        violations.push("user must not be empty".to_string());
    }

    if !workspace.allows_site(&work.site) {
        violations.push(format!(
            "site {} is not one of the workspace sites {:?}",
            work.site, workspace.sites
        ));
    }

    if work.function.is_some() && work.command.is_some() {
        violations.push("command and function cannot be set together".to_string());
    }
    if let Some(function) = &work.function {
        if !valid_function_reference(function) {
            violations.push(format!(
                "function {function} is not a dotted importable reference"
            ));
        }
    }
    if let Some(command) = &work.command {
        if command.is_empty() {
            violations.push("command must not be an empty argv".to_string());
        }
    }

    if work.timeout == 0 || work.timeout > 86400 {
        violations.push(format!("timeout {} outside 1..=86400", work.timeout));
    }
    if work.retries > 5 {
        violations.push(format!("retries {} outside 0..=5", work.retries));
    }
    if work.priority == 0 || work.priority > 5 {
        violations.push(format!("priority {} outside 1..=5", work.priority));
    }

    if let (Some(start), Some(stop)) = (work.start, work.stop) {
        if start > stop {
            violations.push(format!("start {start} is after stop {stop}"));
        }
    }

    if !work.extra.is_empty() {
        let keys: Vec<&String> = work.extra.keys().collect();
        match strategy {
            Strategy::Strict => {
                violations.push(format!("unknown fields: {keys:?}"));
            }
            Strategy::Relaxed => {
                warnings.push(format!("preserving unknown fields: {keys:?}"));
            }
        }
    }

    if !violations.is_empty() {
        return Err(ValidationError { violations });
    }

    if work.creation.is_none() {
        work.creation = Some(unix_now());
    }

    Ok(Validated { work, warnings })
}

/// Lowercases, maps spaces and underscores to hyphens, strips anything
/// else outside `[a-z0-9-]`, and trims leading/trailing separators.
fn normalize_pipeline(pipeline: &str) -> Result<String, String> {
    let normalized: String = pipeline
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '_' { '-' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    let normalized = normalized.trim_matches('-').to_string();
    if normalized.is_empty() {
        return Err(format!("pipeline name {pipeline:?} has no usable characters"));
    }
    Ok(normalized)
}

/// A dotted reference has at least two non-empty identifier segments.
fn valid_function_reference(reference: &str) -> bool {
    let segments: Vec<&str> = reference.split('.').collect();
    segments.len() >= 2
        && segments.iter().all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !segment.chars().next().is_some_and(|c| c.is_ascii_digit())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn workspace() -> Workspace {
        Workspace::from_yaml("workspace: test\nsites: [local, apex]\n").unwrap()
    }

    #[test]
    fn test_valid_work_passes() {
        let raw = json!({
            "pipeline": "sample",
            "site": "local",
            "user": "tester",
            "function": "tasks.add",
            "parameters": {"a": 1, "b": 2},
        });
        let validated = work(raw, &workspace(), Strategy::Strict).unwrap();
        assert_eq!(validated.work.pipeline, "sample");
        assert!(validated.work.creation.is_some());
        assert!(validated.warnings.is_empty());
    }

    #[test]
    fn test_roundtrip_is_identity() {
        let raw = json!({
            "pipeline": "sample",
            "site": "local",
            "user": "tester",
            "command": ["echo", "hi"],
            "tags": ["nightly"],
        });
        let first = work(raw, &workspace(), Strategy::Strict).unwrap().work;
        let serialized = serde_json::to_value(&first).unwrap();
        let second = work(serialized, &workspace(), Strategy::Strict).unwrap().work;
        assert_eq!(first, second);
    }

    #[test]
    fn test_pipeline_normalization_warns() {
        let raw = json!({"pipeline": "My Pipeline_v2!", "site": "local", "user": "t"});
        let validated = work(raw, &workspace(), Strategy::Strict).unwrap();
        assert_eq!(validated.work.pipeline, "my-pipeline-v2");
        assert_eq!(validated.warnings.len(), 1);
    }

    #[test]
    fn test_unusable_pipeline_name_rejected() {
        let raw = json!({"pipeline": "!!!", "site": "local", "user": "t"});
        let err = work(raw, &workspace(), Strategy::Strict).unwrap_err();
        assert!(err.violations[0].contains("no usable characters"));
    }

    #[test]
    fn test_function_and_command_rejected_together() {
        let raw = json!({
            "pipeline": "p", "site": "local", "user": "t",
            "function": "a.b", "command": ["ls"],
        });
        let err = work(raw, &workspace(), Strategy::Strict).unwrap_err();
        assert!(err.violations.iter().any(|v| v.contains("cannot be set together")));
    }

    #[test]
    fn test_unknown_site_rejected() {
        let raw = json!({"pipeline": "p", "site": "mars", "user": "t"});
        let err = work(raw, &workspace(), Strategy::Strict).unwrap_err();
        assert!(err.violations[0].contains("mars"));
    }

    #[test]
    fn test_violations_are_aggregated() {
        let raw = json!({
            "pipeline": "p", "site": "mars", "user": "",
            "timeout": 100000, "priority": 9,
        });
        let err = work(raw, &workspace(), Strategy::Strict).unwrap_err();
        assert_eq!(err.violations.len(), 4);
    }

    #[test]
    fn test_bad_function_reference() {
        let raw = json!({"pipeline": "p", "site": "local", "user": "t", "function": "noDots"});
        let err = work(raw, &workspace(), Strategy::Strict).unwrap_err();
        assert!(err.violations[0].contains("dotted"));
    }

    #[test]
    fn test_start_after_stop_rejected() {
        let raw = json!({
            "pipeline": "p", "site": "local", "user": "t",
            "start": 200.0, "stop": 100.0,
        });
        let err = work(raw, &workspace(), Strategy::Strict).unwrap_err();
        assert!(err.violations[0].contains("after stop"));
    }

    #[test]
    fn test_strict_rejects_unknown_fields() {
        let raw = json!({"pipeline": "p", "site": "local", "user": "t", "shiny": true});
        let err = work(raw, &workspace(), Strategy::Strict).unwrap_err();
        assert!(err.violations[0].contains("unknown fields"));
    }

    #[test]
    fn test_relaxed_preserves_unknown_fields() {
        let raw = json!({"pipeline": "p", "site": "local", "user": "t", "shiny": true});
        let validated = work(raw, &workspace(), Strategy::Relaxed).unwrap();
        assert_eq!(validated.work.extra.get("shiny"), Some(&json!(true)));
        assert_eq!(validated.warnings.len(), 1);
    }

    #[test]
    fn test_existing_creation_kept() {
        let raw = json!({
            "pipeline": "p", "site": "local", "user": "t", "creation": 1700000000.0,
        });
        let validated = work(raw, &workspace(), Strategy::Strict).unwrap();
        assert_eq!(validated.work.creation, Some(1700000000.0));
    }
}
