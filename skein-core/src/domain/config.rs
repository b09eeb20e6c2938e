//! Pipeline Configuration documents
//!
//! A configuration is a declarative YAML document naming an ordered set of
//! steps, each of which expands to one or more [`Work`] items when its
//! stage executes. Parsing is fail-closed: unknown top-level keys reject
//! the document.
//!
//! [`Work`]: crate::domain::work::Work

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// A matrix axis: an explicit value list or an inclusive integer range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Axis {
    Range { range: [i64; 2] },
    List(Vec<Value>),
}

impl Axis {
    /// Concrete values of this axis in declaration order.
    pub fn values(&self) -> Vec<Value> {
        match self {
            Axis::List(values) => values.clone(),
            Axis::Range { range: [lo, hi] } => (*lo..=*hi).map(Value::from).collect(),
        }
    }

    /// Number of concrete values.
    pub fn len(&self) -> usize {
        match self {
            Axis::List(values) => values.len(),
            Axis::Range { range: [lo, hi] } => {
                if hi < lo {
                    0
                } else {
                    (hi - lo + 1) as usize
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A parameter-space specification multiplying a step into replicas.
///
/// Axis declaration order is preserved; the Cartesian product iterates the
/// last axis fastest.
pub type Matrix = IndexMap<String, Axis>;

/// Cron schedule attached to a configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Schedule {
    /// Cron expression handed to the pipelines manager.
    pub cronspec: String,
    /// Maximum number of firings; 0 means unbounded.
    #[serde(default)]
    pub count: u32,
}

/// Reserved `if` conditions plus free-form expressions over the pipeline
/// execution context.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// All steps in prior stages succeeded.
    Success,
    /// Any step in a prior stage failed.
    Failure,
    /// Unconditional.
    Always,
    /// An expression evaluated by the pipelines manager at execution time.
    Expression(String),
}

impl Condition {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "success" => Condition::Success,
            "failure" => Condition::Failure,
            "always" => Condition::Always,
            other => Condition::Expression(other.to_string()),
        }
    }
}

/// One entry in a configuration's `pipeline` mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    /// Ordering key; stages execute in ascending order.
    pub stage: u32,
    /// Partial work template, completed by defaults and matrix expansion.
    pub work: Map<String, Value>,
    /// Step-local matrix; axis names must not collide with the top level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<Matrix>,
    /// Execution gate over prior stages.
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub if_condition: Option<String>,
    /// Deployment hint for the site scheduler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runs_on: Option<String>,
    /// Sidecar services the step expects at its deployment site.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<String>>,
}

impl Step {
    /// The parsed `if` condition, when one is declared.
    pub fn condition(&self) -> Option<Condition> {
        self.if_condition.as_deref().map(Condition::parse)
    }
}

/// A declarative pipeline configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// Schema version of the document.
    pub version: String,
    /// Configuration name; becomes the pipeline name of expanded work.
    pub name: String,
    /// Work attributes inherited by every step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<Map<String, Value>>,
    /// Matrix applied to every step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<Matrix>,
    /// Cron schedule; when present the document registers with the
    /// pipelines manager instead of depositing immediately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    /// Ordered step-name to step mapping.
    pub pipeline: IndexMap<String, Step>,
}

impl Configuration {
    /// Parses a configuration from a YAML document. Unknown top-level
    /// keys reject the document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// True when the configuration carries a cron schedule.
    pub fn is_scheduled(&self) -> bool {
        self.schedule.is_some()
    }

    /// Distinct stage numbers in ascending order.
    pub fn stages(&self) -> Vec<u32> {
        let mut stages: Vec<u32> = self.pipeline.values().map(|s| s.stage).collect();
        stages.sort_unstable();
        stages.dedup();
        stages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"
version: "1"
name: daily-averages
defaults:
  user: pipeline-bot
  site: local
matrix:
  date: ["2024-01-01", "2024-01-02"]
schedule:
  cronspec: "0 4 * * *"
  count: 10
pipeline:
  fetch:
    stage: 1
    work:
      function: fetch.pull
      parameters:
        date: ${{ matrix.date }}
  reduce:
    stage: 2
    if: success
    work:
      function: reduce.mean
"#;

    #[test]
    fn test_parse_configuration() {
        let config = Configuration::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.name, "daily-averages");
        assert!(config.is_scheduled());
        assert_eq!(config.schedule.as_ref().unwrap().count, 10);
        assert_eq!(config.pipeline.len(), 2);
        // declaration order is preserved
        let names: Vec<&String> = config.pipeline.keys().collect();
        assert_eq!(names, ["fetch", "reduce"]);
        assert_eq!(config.stages(), vec![1, 2]);
    }

    #[test]
    fn test_unknown_top_level_key_rejected() {
        let yaml = "version: \"1\"\nname: x\nsurprise: true\npipeline: {}\n";
        assert!(Configuration::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_axis_range_values() {
        let axis = Axis::Range { range: [2, 5] };
        assert_eq!(axis.len(), 4);
        assert_eq!(axis.values(), vec![json!(2), json!(3), json!(4), json!(5)]);
    }

    #[test]
    fn test_axis_list_values() {
        let axis = Axis::List(vec![json!("a"), json!(1)]);
        assert_eq!(axis.len(), 2);
        assert_eq!(axis.values(), vec![json!("a"), json!(1)]);
    }

    #[test]
    fn test_axis_yaml_forms() {
        let matrix: Matrix =
            serde_yaml::from_str("job_id:\n  range: [1, 3]\nsite: [a, b]\n").unwrap();
        assert_eq!(matrix["job_id"], Axis::Range { range: [1, 3] });
        assert_eq!(matrix["site"].len(), 2);
    }

    #[test]
    fn test_condition_parsing() {
        assert_eq!(Condition::parse("success"), Condition::Success);
        assert_eq!(Condition::parse(" always "), Condition::Always);
        assert_eq!(
            Condition::parse("${{ pipeline.fetch.status }} == 'success'"),
            Condition::Expression("${{ pipeline.fetch.status }} == 'success'".to_string())
        );
    }

    #[test]
    fn test_step_condition_accessor() {
        let config = Configuration::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.pipeline["reduce"].condition(), Some(Condition::Success));
        assert_eq!(config.pipeline["fetch"].condition(), None);
    }
}
