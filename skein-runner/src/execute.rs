//! Work execution
//!
//! Dispatches a withdrawn work item: `command` work spawns a subprocess
//! and captures its raw output, `function` work calls a registered task
//! on a blocking thread. Both paths enforce the work's timeout and fold
//! the outcome back into the work item; execution errors never propagate
//! upward, they become `status = failure` with `results.error` set.

use std::process::Stdio;
use std::time::Duration;

use serde_json::{json, Value};
use skein_core::merge::merge_maps;
use skein_core::{Work, WorkStatus};
use tracing::{debug, info, warn};

use crate::config::ArgSource;
use crate::registry::{Outcome, Registry, TaskInput};

/// Results payloads above this size are dropped rather than shipped.
const MAX_RESULTS_BYTES: usize = 4_000_000;

/// Executes the work's command in a subprocess.
///
/// Captured stdout and stderr are stored as raw strings; nothing is
/// parsed out of them. Exit code 0 is success, anything else failure.
/// On timeout the child is killed and the work fails with a timeout
/// error.
pub async fn command(work: &mut Work) {
    let argv = work.command.clone().unwrap_or_default();
    if argv.is_empty() {
        work.status = WorkStatus::Failure;
        work.record_error("missing command to execute");
        return;
    }
    debug!("executing command: {argv:?}");

    let mut cmd = tokio::process::Command::new(&argv[0]);
    cmd.args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            work.status = WorkStatus::Failure;
            work.record_error(format!("failed to spawn {}: {err}", argv[0]));
            return;
        }
    };

    let timeout = Duration::from_secs(work.timeout as u64);
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let returncode = output.status.code().unwrap_or(-1);
            let results = json!({
                "args": argv,
                "stdout": String::from_utf8_lossy(&output.stdout),
                "stderr": String::from_utf8_lossy(&output.stderr),
                "returncode": returncode,
            });
            let merged = match work.results.take() {
                Some(existing) => merge_maps(existing, as_map(results)),
                None => as_map(results),
            };
            work.results = Some(merged);
            enforce_results_size(work);
            work.status = if returncode == 0 {
                WorkStatus::Success
            } else {
                WorkStatus::Failure
            };
        }
        Ok(Err(err)) => {
            work.status = WorkStatus::Failure;
            work.record_error(format!("process error: {err}"));
        }
        Err(_) => {
            // the dropped child is killed via kill_on_drop
            warn!("command timed out after {}s", work.timeout);
            work.status = WorkStatus::Failure;
            work.record_error(format!("timeout after {}s", work.timeout));
        }
    }
}

/// Executes the work's function through the registry.
///
/// Task defaults merge under explicit parameters first (explicit wins,
/// null defaults are dropped). The task runs on a blocking thread under
/// the work's timeout; a timed-out task is abandoned and keeps running
/// until it terminates naturally, but its work is recorded as failed.
pub async fn function(work: &mut Work, registry: &Registry, arg_source: ArgSource) {
    let Some(name) = work.function.clone() else {
        work.status = WorkStatus::Failure;
        work.record_error("missing function to execute");
        return;
    };
    let Some(task) = registry.get(&name) else {
        work.status = WorkStatus::Failure;
        work.record_error(format!("function {name} is not registered"));
        return;
    };

    if let Some(defaults) = task.defaults() {
        let mut params = work.parameters.take().unwrap_or_default();
        for (key, value) in defaults {
            if !params.contains_key(&key) && !value.is_null() {
                params.insert(key, value);
            }
        }
        debug!("parameters after defaults: {params:?}");
        work.parameters = Some(params);
    }

    info!("executing function: {name}");
    let input_work = work.clone();
    let params = work.parameters.clone().unwrap_or_default();
    let handle = tokio::task::spawn_blocking(move || {
        let input = match arg_source {
            ArgSource::Parameters => TaskInput::Parameters(&params),
            ArgSource::Work => TaskInput::Work(&input_work),
        };
        task.call(input)
    });

    let timeout = Duration::from_secs(work.timeout as u64);
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(Ok(outcome))) => {
            apply_outcome(work, outcome);
            enforce_results_size(work);
            work.status = WorkStatus::Success;
        }
        Ok(Ok(Err(err))) => {
            work.status = WorkStatus::Failure;
            work.record_error(format!("{err:#}"));
        }
        Ok(Err(join_err)) => {
            work.status = WorkStatus::Failure;
            work.record_error(format!("task panicked: {join_err}"));
        }
        Err(_) => {
            // the task thread cannot be interrupted; abandon its result
            warn!("function {name} timed out after {}s, abandoning", work.timeout);
            work.status = WorkStatus::Failure;
            work.record_error(format!("timeout after {}s", work.timeout));
        }
    }
}

/// Merges a task outcome into the work: results deep-merge, product and
/// plot paths concatenate.
fn apply_outcome(work: &mut Work, outcome: Outcome) {
    if let Some(results) = outcome.results {
        let merged = match work.results.take() {
            Some(existing) => merge_maps(existing, results),
            None => results,
        };
        work.results = Some(merged);
    }
    if let Some(products) = outcome.products {
        work.products.get_or_insert_with(Vec::new).extend(products);
    }
    if let Some(plots) = outcome.plots {
        work.plots.get_or_insert_with(Vec::new).extend(plots);
    }
}

/// Drops oversized results rather than shipping them to the bucket.
fn enforce_results_size(work: &mut Work) {
    let Some(results) = &work.results else { return };
    let size = serde_json::to_vec(results).map(|b| b.len()).unwrap_or(0);
    if size > MAX_RESULTS_BYTES {
        warn!("results size {size}B exceeds {MAX_RESULTS_BYTES}B, dropping");
        work.results = None;
        work.record_error(format!("results of {size}B exceed the {MAX_RESULTS_BYTES}B limit"));
    }
}

fn as_map(value: Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = serde_json::Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Parameters;
    use skein_core::domain::work::unix_now;

    fn work_with_command(argv: &[&str], timeout: u32) -> Work {
        let mut work = Work::new("sample", "local", "tester");
        work.command = Some(argv.iter().map(|s| s.to_string()).collect());
        work.timeout = timeout;
        work
    }

    #[tokio::test]
    async fn test_command_success_captures_output() {
        let mut work = work_with_command(&["echo", "hello"], 60);
        command(&mut work).await;
        assert_eq!(work.status, WorkStatus::Success);
        let results = work.results.unwrap();
        assert_eq!(results["returncode"], json!(0));
        assert_eq!(results["stdout"], json!("hello\n"));
        assert_eq!(results["stderr"], json!(""));
    }

    #[tokio::test]
    async fn test_command_nonzero_exit() {
        let mut work = work_with_command(&["sh", "-c", "exit 7"], 60);
        command(&mut work).await;
        assert_eq!(work.status, WorkStatus::Failure);
        let results = work.results.unwrap();
        assert_eq!(results["returncode"], json!(7));
        assert_eq!(results["stdout"], json!(""));
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let mut work = work_with_command(&["sleep", "10"], 1);
        let start = unix_now();
        command(&mut work).await;
        let elapsed = unix_now() - start;
        assert_eq!(work.status, WorkStatus::Failure);
        assert!(work.results.unwrap()["error"]
            .as_str()
            .unwrap()
            .contains("timeout"));
        // killed within the grace bound, not left to run out the sleep
        assert!(elapsed >= 1.0 && elapsed < 6.0, "elapsed {elapsed}");
    }

    #[tokio::test]
    async fn test_command_missing_binary() {
        let mut work = work_with_command(&["definitely-not-a-binary-xyz"], 60);
        command(&mut work).await;
        assert_eq!(work.status, WorkStatus::Failure);
        assert!(work.results.unwrap()["error"]
            .as_str()
            .unwrap()
            .contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_function_happy_path() {
        let mut registry = Registry::new();
        registry.register_fn("tests.add", |input| {
            let params = input.parameters().cloned().unwrap_or_default();
            let sum = params["a"].as_i64().unwrap() + params["b"].as_i64().unwrap();
            let mut results = Parameters::new();
            results.insert("sum".to_string(), json!(sum));
            Ok(Outcome::results(results))
        });

        let mut work = Work::new("sample", "local", "tester");
        work.function = Some("tests.add".to_string());
        work.parameters = Some(as_map(json!({"a": 1, "b": 2})));
        function(&mut work, &registry, ArgSource::Parameters).await;

        assert_eq!(work.status, WorkStatus::Success);
        assert_eq!(work.results.unwrap()["sum"], json!(3));
    }

    #[tokio::test]
    async fn test_function_error_is_captured() {
        let mut registry = Registry::new();
        registry.register_fn("tests.fail", |_| anyhow::bail!("user code exploded"));

        let mut work = Work::new("sample", "local", "tester");
        work.function = Some("tests.fail".to_string());
        function(&mut work, &registry, ArgSource::Parameters).await;

        assert_eq!(work.status, WorkStatus::Failure);
        assert!(work.results.unwrap()["error"]
            .as_str()
            .unwrap()
            .contains("user code exploded"));
    }

    #[tokio::test]
    async fn test_function_not_registered() {
        let registry = Registry::new();
        let mut work = Work::new("sample", "local", "tester");
        work.function = Some("tests.absent".to_string());
        function(&mut work, &registry, ArgSource::Parameters).await;
        assert_eq!(work.status, WorkStatus::Failure);
        assert!(work.results.unwrap()["error"]
            .as_str()
            .unwrap()
            .contains("not registered"));
    }

    #[tokio::test]
    async fn test_defaults_merge_explicit_wins() {
        let mut registry = Registry::new();
        let mut defaults = Parameters::new();
        defaults.insert("a".to_string(), json!(100));
        defaults.insert("b".to_string(), json!(50));
        defaults.insert("skipped".to_string(), Value::Null);
        defaults.insert("flag".to_string(), json!(true));
        registry.register_fn_with_defaults("tests.cli", defaults, |input| {
            let params = input.parameters().cloned().unwrap_or_default();
            let mut results = Parameters::new();
            results.insert("seen".to_string(), Value::Object(params));
            Ok(Outcome::results(results))
        });

        let mut work = Work::new("sample", "local", "tester");
        work.function = Some("tests.cli".to_string());
        work.parameters = Some(as_map(json!({"a": 1})));
        function(&mut work, &registry, ArgSource::Parameters).await;

        let results = work.results.unwrap();
        let seen = &results["seen"];
        // explicit parameter beats the default
        assert_eq!(seen["a"], json!(1));
        // missing parameter takes the default
        assert_eq!(seen["b"], json!(50));
        // null defaults are dropped, flags pass as booleans
        assert!(seen.get("skipped").is_none());
        assert_eq!(seen["flag"], json!(true));
    }

    #[tokio::test]
    async fn test_results_accumulate_across_attempts() {
        let mut registry = Registry::new();
        registry.register_fn("tests.accumulate", |_| {
            let mut results = Parameters::new();
            results.insert("second".to_string(), json!(2));
            results.insert("nested".to_string(), json!({"b": 2}));
            Ok(Outcome::results(results))
        });

        let mut work = Work::new("sample", "local", "tester");
        work.function = Some("tests.accumulate".to_string());
        work.results = Some(as_map(json!({"first": 1, "nested": {"a": 1}})));
        function(&mut work, &registry, ArgSource::Parameters).await;

        let results = work.results.unwrap();
        assert_eq!(results["first"], json!(1));
        assert_eq!(results["second"], json!(2));
        assert_eq!(results["nested"], json!({"a": 1, "b": 2}));
    }

    #[tokio::test]
    async fn test_products_and_plots_concatenate() {
        let mut registry = Registry::new();
        registry.register_fn("tests.artifacts", |_| {
            Ok(Outcome {
                results: None,
                products: Some(vec!["/tmp/b.dat".to_string()]),
                plots: Some(vec!["/tmp/b.png".to_string()]),
            })
        });

        let mut work = Work::new("sample", "local", "tester");
        work.function = Some("tests.artifacts".to_string());
        work.products = Some(vec!["/tmp/a.dat".to_string()]);
        function(&mut work, &registry, ArgSource::Parameters).await;

        assert_eq!(work.products.unwrap(), vec!["/tmp/a.dat", "/tmp/b.dat"]);
        assert_eq!(work.plots.unwrap(), vec!["/tmp/b.png"]);
    }

    #[tokio::test]
    async fn test_oversized_results_dropped() {
        let mut registry = Registry::new();
        registry.register_fn("tests.huge", |_| {
            let mut results = Parameters::new();
            results.insert("blob".to_string(), json!("x".repeat(MAX_RESULTS_BYTES + 1)));
            Ok(Outcome::results(results))
        });

        let mut work = Work::new("sample", "local", "tester");
        work.function = Some("tests.huge".to_string());
        function(&mut work, &registry, ArgSource::Parameters).await;

        let results = work.results.unwrap();
        assert!(results.get("blob").is_none());
        assert!(results["error"].as_str().unwrap().contains("exceed"));
    }
}
