//! Pipeline Configuration expansion
//!
//! Translates a validated configuration document into a stage-ordered list
//! of concrete [`Work`] items: defaults are layered under each step's work
//! template, matrices multiply steps by the Cartesian product of their
//! axes, and `${{ matrix.<key> }}` tokens are substituted structurally.
//!
//! The expander is a pure transformation; depositing the emitted work and
//! evaluating execution-time expressions belong to the pipelines manager.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::domain::config::{Axis, Condition, Configuration, Matrix, Step};
use crate::domain::work::{Work, WorkStatus};
use crate::domain::workspace::Workspace;
use crate::error::ConfigError;
use crate::merge::deep_merge;
use crate::validate::{self, Strategy};

/// A step after matrix expansion: every concrete work item it contributes
/// when its stage executes.
#[derive(Debug, Clone)]
pub struct ExpandedStep {
    pub name: String,
    pub stage: u32,
    pub condition: Option<Condition>,
    pub works: Vec<Work>,
}

/// Steps grouped by stage, ascending. Declaration order is preserved
/// within a stage.
#[derive(Debug, Clone)]
pub struct StageGroup {
    pub stage: u32,
    pub steps: Vec<ExpandedStep>,
}

impl Condition {
    /// Evaluates a reserved condition over the aggregate outcome of all
    /// prior stages. Expressions are execution-time and return `None`.
    pub fn evaluate(&self, prior: &[WorkStatus]) -> Option<bool> {
        match self {
            Condition::Success => Some(prior.iter().all(|s| *s == WorkStatus::Success)),
            Condition::Failure => Some(prior.iter().any(|s| *s == WorkStatus::Failure)),
            Condition::Always => Some(true),
            Condition::Expression(_) => None,
        }
    }
}

/// Expands a configuration into stage groups of concrete work.
///
/// Violations are aggregated across the whole document and returned
/// together, never one at a time.
pub fn expand(config: &Configuration, workspace: &Workspace) -> Result<Vec<StageGroup>, ConfigError> {
    let mut violations: Vec<String> = Vec::new();

    if !config.version.starts_with('1') {
        violations.push(format!("unsupported configuration version {}", config.version));
    }
    if config.name.is_empty() {
        violations.push("configuration name must not be empty".to_string());
    }
    if config.pipeline.is_empty() {
        violations.push("configuration declares no steps".to_string());
    }
    if let Some(matrix) = &config.matrix {
        check_matrix("top-level", matrix, &mut violations);
    }

    let mut expanded: Vec<ExpandedStep> = Vec::new();

    for (name, step) in &config.pipeline {
        if step.stage == 0 {
            violations.push(format!("step {name}: stage must be positive"));
        }
        let matrix = match merged_matrix(config.matrix.as_ref(), step, name, &mut violations) {
            Some(matrix) => matrix,
            None => continue,
        };
        if let Some(step_matrix) = &step.matrix {
            check_matrix(name, step_matrix, &mut violations);
        }

        let template = effective_template(config, step);
        let mut works: Vec<Work> = Vec::new();

        for combo in combinations(&matrix) {
            let mut concrete = substitute(Value::Object(template.clone()), &combo);
            inject_identity(&mut concrete, config, &mut violations, name);
            match validate::work(concrete, workspace, Strategy::Strict) {
                Ok(validated) => works.push(validated.work),
                Err(err) => {
                    for violation in err.violations {
                        violations.push(format!("step {name}: {violation}"));
                    }
                }
            }
        }

        expanded.push(ExpandedStep {
            name: name.clone(),
            stage: step.stage,
            condition: step.condition(),
            works,
        });
    }

    if !violations.is_empty() {
        return Err(ConfigError::Invalid(violations));
    }

    Ok(group_by_stage(expanded))
}

/// Layers the configuration defaults under the step's work template.
fn effective_template(config: &Configuration, step: &Step) -> Map<String, Value> {
    let defaults = config.defaults.clone().unwrap_or_default();
    match deep_merge(Value::Object(defaults), Value::Object(step.work.clone())) {
        Value::Object(map) => map,
        _ => unreachable!("merging two objects yields an object"),
    }
}

/// Combines the top-level and step matrices; shared axis names reject the
/// configuration.
fn merged_matrix(
    top: Option<&Matrix>,
    step: &Step,
    name: &str,
    violations: &mut Vec<String>,
) -> Option<Matrix> {
    let mut merged: Matrix = top.cloned().unwrap_or_default();
    if let Some(step_matrix) = &step.matrix {
        for (axis, spec) in step_matrix {
            if merged.contains_key(axis) {
                violations.push(format!(
                    "step {name}: matrix axis {axis} collides with the top-level matrix"
                ));
                return None;
            }
            merged.insert(axis.clone(), spec.clone());
        }
    }
    Some(merged)
}

fn check_matrix(owner: &str, matrix: &Matrix, violations: &mut Vec<String>) {
    for (axis, spec) in matrix {
        if let Axis::Range { range: [lo, hi] } = spec {
            if lo > hi {
                violations.push(format!("{owner}: axis {axis} range [{lo}, {hi}] is inverted"));
            }
        }
        if spec.is_empty() {
            violations.push(format!("{owner}: axis {axis} has no values"));
        }
    }
}

/// The Cartesian product of the matrix axes, in declaration order with the
/// last axis iterating fastest. An empty matrix yields one empty tuple.
fn combinations(matrix: &Matrix) -> Vec<IndexMap<String, Value>> {
    let mut combos: Vec<IndexMap<String, Value>> = vec![IndexMap::new()];
    for (axis, spec) in matrix {
        let values = spec.values();
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for value in &values {
                let mut extended = combo.clone();
                extended.insert(axis.clone(), value.clone());
                next.push(extended);
            }
        }
        combos = next;
    }
    combos
}

/// Replaces `${{ matrix.<key> }}` tokens throughout a JSON value.
///
/// A string that is exactly one token takes the axis value with its type
/// preserved; embedded tokens are string-interpolated. Tokens in other
/// namespaces (`pipeline.*`) are execution-time references and pass
/// through untouched.
fn substitute(value: Value, combo: &IndexMap<String, Value>) -> Value {
    match value {
        Value::String(s) => substitute_string(&s, combo),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| substitute(v, combo)).collect())
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, substitute(v, combo)))
                .collect(),
        ),
        other => other,
    }
}

fn substitute_string(s: &str, combo: &IndexMap<String, Value>) -> Value {
    // Whole-scalar token: preserve the axis value's type.
    if let Some(key) = sole_token(s) {
        if let Some(value) = combo.get(key) {
            return value.clone();
        }
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(open) = rest.find("${{") {
        let Some(close) = rest[open..].find("}}") else {
            break;
        };
        let inner = rest[open + 3..open + close].trim();
        out.push_str(&rest[..open]);
        match inner.strip_prefix("matrix.").and_then(|key| combo.get(key)) {
            Some(value) => out.push_str(&render(value)),
            // Unknown namespace or axis: keep the token verbatim.
            None => out.push_str(&rest[open..open + close + 2]),
        }
        rest = &rest[open + close + 2..];
    }
    out.push_str(rest);
    Value::String(out)
}

/// When the whole string is a single `${{ matrix.<key> }}` token, the key.
fn sole_token(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    let inner = trimmed.strip_prefix("${{")?.strip_suffix("}}")?.trim();
    let key = inner.strip_prefix("matrix.")?;
    (!key.contains("${{")).then_some(key)
}

/// Renders an axis value for string interpolation.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Fills the pipeline name from the configuration when the template does
/// not set one.
fn inject_identity(
    concrete: &mut Value,
    config: &Configuration,
    violations: &mut Vec<String>,
    step: &str,
) {
    match concrete {
        Value::Object(map) => {
            map.entry("pipeline".to_string())
                .or_insert_with(|| Value::String(config.name.clone()));
        }
        _ => violations.push(format!("step {step}: work template is not a mapping")),
    }
}

fn group_by_stage(steps: Vec<ExpandedStep>) -> Vec<StageGroup> {
    let mut stages: Vec<u32> = steps.iter().map(|s| s.stage).collect();
    stages.sort_unstable();
    stages.dedup();

    stages
        .into_iter()
        .map(|stage| StageGroup {
            stage,
            steps: steps.iter().filter(|s| s.stage == stage).cloned().collect(),
        })
        .collect()
}
