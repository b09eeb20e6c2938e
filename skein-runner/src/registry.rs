//! Task registry
//!
//! Function work names a callable by a dotted reference. In a compiled
//! runner that reference is a lookup key: user code registers named tasks
//! at process start and the lifecycle resolves them here.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use skein_core::Work;

/// Keyword parameters passed to a task.
pub type Parameters = Map<String, Value>;

/// What a task returns: results to merge into the work, plus any product
/// and plot paths it produced.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    pub results: Option<Parameters>,
    pub products: Option<Vec<String>>,
    pub plots: Option<Vec<String>>,
}

impl Outcome {
    /// An outcome carrying only results.
    pub fn results(results: Parameters) -> Self {
        Self {
            results: Some(results),
            ..Default::default()
        }
    }
}

/// Input handed to a task, selected by the runner's `arg_source` flag.
#[derive(Debug, Clone, Copy)]
pub enum TaskInput<'a> {
    /// The work's parameters as keyword arguments.
    Parameters(&'a Parameters),
    /// The whole work object.
    Work(&'a Work),
}

impl TaskInput<'_> {
    /// The parameters, however the input was passed.
    pub fn parameters(&self) -> Option<&Parameters> {
        match self {
            TaskInput::Parameters(params) => Some(params),
            TaskInput::Work(work) => work.parameters.as_ref(),
        }
    }
}

/// A named callable the runner can execute.
///
/// `defaults` is introspection for callables wrapping a CLI command: the
/// lifecycle merges the declared defaults under the work's explicit
/// parameters before calling (explicit wins, null defaults are dropped,
/// flag-style defaults are booleans).
pub trait Task: Send + Sync {
    fn call(&self, input: TaskInput<'_>) -> anyhow::Result<Outcome>;

    fn defaults(&self) -> Option<Parameters> {
        None
    }
}

/// A task built from a plain closure.
struct FnTask<F> {
    func: F,
    defaults: Option<Parameters>,
}

impl<F> Task for FnTask<F>
where
    F: Fn(TaskInput<'_>) -> anyhow::Result<Outcome> + Send + Sync,
{
    fn call(&self, input: TaskInput<'_>) -> anyhow::Result<Outcome> {
        (self.func)(input)
    }

    fn defaults(&self) -> Option<Parameters> {
        self.defaults.clone()
    }
}

/// Named-task lookup table. Built once at process start and passed
/// explicitly to the lifecycle.
#[derive(Default, Clone)]
pub struct Registry {
    tasks: HashMap<String, Arc<dyn Task>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task under its dotted reference.
    pub fn register(&mut self, name: impl Into<String>, task: impl Task + 'static) {
        self.tasks.insert(name.into(), Arc::new(task));
    }

    /// Registers a closure as a task.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(TaskInput<'_>) -> anyhow::Result<Outcome> + Send + Sync + 'static,
    {
        self.tasks.insert(
            name.into(),
            Arc::new(FnTask {
                func,
                defaults: None,
            }),
        );
    }

    /// Registers a closure together with its default-parameter table.
    pub fn register_fn_with_defaults<F>(
        &mut self,
        name: impl Into<String>,
        defaults: Parameters,
        func: F,
    ) where
        F: Fn(TaskInput<'_>) -> anyhow::Result<Outcome> + Send + Sync + 'static,
    {
        self.tasks.insert(
            name.into(),
            Arc::new(FnTask {
                func,
                defaults: Some(defaults),
            }),
        );
    }

    /// Looks up a task by its dotted reference.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Task>> {
        self.tasks.get(name).cloned()
    }

    /// Registered task names.
    pub fn names(&self) -> Vec<&str> {
        self.tasks.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("tasks", &self.names())
            .finish()
    }
}
