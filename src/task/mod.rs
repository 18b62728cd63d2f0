//! Pluggable analysis tasks.
//!
//! Every analyzer, in-process or external, implements [`AnalysisTask`]. The
//! orchestrator only ever sees this trait, which is what lets it treat every
//! task uniformly.

pub mod command;
pub mod limiter;

pub use command::{CommandSpec, CommandTask};
pub use limiter::{RateLimitPermit, RateLimiter};

use crate::error::{GraphError, TaskError};
use crate::models::{SubmissionRecord, TaskOutput};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Contract for one unit of analysis work.
///
/// Implementations report failures by returning `Err`; a panic is also caught
/// by the orchestrator, but returning an error gives a better diagnostic.
#[async_trait]
pub trait AnalysisTask: Send + Sync {
    /// Task name, matching its [`AnalysisTaskSpec`].
    fn name(&self) -> &str;

    /// Analyze one submission.
    async fn run(&self, ctx: TaskContext) -> Result<TaskOutput, TaskError>;
}

/// Everything a task may use while analyzing one submission.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub submission: Arc<SubmissionRecord>,
    pub task: String,
    /// Root directory of this submission's outputs.
    pub submission_dir: PathBuf,
    /// Scoped artifact directory for this task; exists before `run` is called.
    pub output_dir: PathBuf,
    /// Outputs of the task's dependencies (all of which succeeded).
    pub dependencies: BTreeMap<String, TaskOutput>,
    pub cancel: CancellationToken,
}

impl TaskContext {
    /// Value of a provided submission parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.submission.param(name)
    }

    /// Output of a dependency.
    pub fn dependency(&self, task: &str) -> Option<&TaskOutput> {
        self.dependencies.get(task)
    }
}

/// Declared configuration of one task, shared by every submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisTaskSpec {
    pub name: String,

    /// Tasks that must succeed before this one starts.
    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default = "default_task_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Eligible for one retry after a failure or timeout.
    #[serde(default)]
    pub transient: bool,

    /// Runs only while holding a slot of the run's shared rate limiter.
    #[serde(default)]
    pub rate_limited: bool,

    /// Submission parameters that must be provided; otherwise the task is skipped.
    #[serde(default)]
    pub requires: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandSpec>,
}

fn default_task_timeout() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

impl AnalysisTaskSpec {
    /// A spec with defaults, for tasks registered in code.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            timeout_seconds: default_task_timeout(),
            enabled: true,
            transient: false,
            rate_limited: false,
            requires: Vec::new(),
            command: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Declared required parameters plus those referenced by the command.
    pub fn required_parameters(&self) -> BTreeSet<String> {
        let mut params: BTreeSet<String> = self.requires.iter().cloned().collect();
        if let Some(command) = &self.command {
            params.extend(command.parameter_placeholders());
        }
        params
    }
}

/// Task implementations by name.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<dyn AnalysisTask>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an in-process implementation under its own name.
    pub fn register(&mut self, task: impl AnalysisTask + 'static) {
        self.tasks.insert(task.name().to_string(), Arc::new(task));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AnalysisTask>> {
        self.tasks.get(name).cloned()
    }

    /// Pick an implementation for every enabled spec. A `command` wins over a
    /// registered implementation of the same name.
    pub fn resolve(
        &self,
        specs: &[AnalysisTaskSpec],
    ) -> Result<BTreeMap<String, Arc<dyn AnalysisTask>>, GraphError> {
        let mut resolved = BTreeMap::new();
        for spec in specs.iter().filter(|s| s.enabled) {
            let task: Arc<dyn AnalysisTask> = match (&spec.command, self.get(&spec.name)) {
                (Some(command), _) => Arc::new(CommandTask::new(&spec.name, command.clone())),
                (None, Some(task)) => task,
                (None, None) => return Err(GraphError::UnknownImplementation(spec.name.clone())),
            };
            resolved.insert(spec.name.clone(), task);
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    #[async_trait]
    impl AnalysisTask for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn run(&self, _ctx: TaskContext) -> Result<TaskOutput, TaskError> {
            Ok(TaskOutput::default().with_field("percent", 80))
        }
    }

    #[test]
    fn test_resolve_prefers_command_and_requires_implementation() {
        let mut registry = TaskRegistry::new();
        registry.register(Fixed);

        let mut with_command = AnalysisTaskSpec::new("fixed");
        with_command.command = Some(CommandSpec {
            program: "true".to_string(),
            args: vec![],
            result_file: "result.json".to_string(),
            env: BTreeMap::new(),
        });
        let resolved = registry.resolve(&[with_command]).unwrap();
        assert!(resolved.contains_key("fixed"));

        let unknown = AnalysisTaskSpec::new("ghost");
        assert!(matches!(
            registry.resolve(&[unknown.clone()]),
            Err(GraphError::UnknownImplementation(name)) if name == "ghost"
        ));

        let mut disabled = unknown;
        disabled.enabled = false;
        assert!(registry.resolve(&[disabled]).unwrap().is_empty());
    }

    #[test]
    fn test_required_parameters_include_placeholders() {
        let mut spec = AnalysisTaskSpec::new("performance");
        spec.requires = vec!["repo_url".to_string()];
        spec.command = Some(CommandSpec {
            program: "lighthouse".to_string(),
            args: vec!["{deploy_url}".to_string(), "{output_dir}".to_string()],
            result_file: "result.json".to_string(),
            env: BTreeMap::new(),
        });
        let params: Vec<_> = spec.required_parameters().into_iter().collect();
        assert_eq!(params, vec!["deploy_url", "repo_url"]);
    }

    #[test]
    fn test_spec_defaults_from_toml() {
        let spec: AnalysisTaskSpec = toml::from_str("name = \"git_history\"").unwrap();
        assert!(spec.enabled);
        assert!(!spec.transient);
        assert_eq!(spec.timeout(), Duration::from_secs(300));
        assert!(spec.command.is_none());
    }
}
