//! Task orchestration.
//!
//! [`executor`] runs one submission's tasks along the dependency graph;
//! [`batch`] drives many submissions with bounded parallelism and turns each
//! into a written report.

pub mod batch;
pub mod executor;
pub mod graph;

pub use batch::{BatchSummary, Orchestrator, SubmissionOutcome, SubmissionSummary};
pub use executor::run_tasks;
pub use graph::TaskGraph;

use crate::error::GraphError;
use crate::rubric::Rubric;
use crate::task::{AnalysisTask, AnalysisTaskSpec, RateLimiter, TaskRegistry};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Tuning knobs for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    /// Submissions processed concurrently.
    pub workers: usize,
    /// Tasks run concurrently within one submission.
    pub task_parallelism: usize,
    /// Time in-flight tasks get to finish after cancellation.
    pub grace_period: Duration,
    /// Wait before retrying a transient task.
    pub retry_backoff: Duration,
    /// Draw a progress bar.
    pub show_progress: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            task_parallelism: 3,
            grace_period: Duration::from_secs(10),
            retry_backoff: Duration::from_secs(5),
            show_progress: true,
        }
    }
}

/// Per-run state handed to every submission. Nothing here is global.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub output_root: PathBuf,
    /// Shared by every `rate_limited` task of every submission.
    pub limiter: Arc<RateLimiter>,
    pub cancel: CancellationToken,
    pub settings: OrchestratorSettings,
}

impl RunContext {
    pub fn new(output_root: impl Into<PathBuf>, settings: OrchestratorSettings) -> Self {
        Self {
            output_root: output_root.into(),
            limiter: Arc::new(RateLimiter::unlimited()),
            cancel: CancellationToken::new(),
            settings,
        }
    }

    pub fn with_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Arc::new(limiter);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Directory holding one submission's outputs.
    pub fn submission_dir(&self, submission_id: &str) -> PathBuf {
        self.output_root.join(submission_id)
    }
}

/// Everything needed to assess a submission, resolved once per run.
#[derive(Clone)]
pub struct ExecutionPlan {
    pub graph: TaskGraph,
    /// Implementations of the enabled tasks.
    pub tasks: BTreeMap<String, Arc<dyn AnalysisTask>>,
    pub rubric: Arc<Rubric>,
}

impl ExecutionPlan {
    /// Validate the graph and resolve every enabled task.
    pub fn new(
        specs: Vec<AnalysisTaskSpec>,
        registry: &TaskRegistry,
        rubric: Arc<Rubric>,
    ) -> Result<Self, GraphError> {
        let tasks = registry.resolve(&specs)?;
        let graph = TaskGraph::new(specs)?;
        Ok(Self {
            graph,
            tasks,
            rubric,
        })
    }

    /// Tasks the rubric reads from that are not configured. Their criteria
    /// always stay Unscored.
    pub fn unconfigured_sources(&self) -> BTreeSet<String> {
        self.rubric
            .required_fields()
            .into_keys()
            .filter(|task| self.graph.spec(task).is_none())
            .collect()
    }

    /// Human-readable plan, one dependency level per line.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for (depth, level) in self.graph.levels().iter().enumerate() {
            let names: Vec<String> = level
                .iter()
                .map(|name| match self.graph.spec(name) {
                    Some(spec) if !spec.enabled => format!("{} (disabled)", name),
                    Some(spec) if spec.transient => format!("{} (transient)", name),
                    _ => name.clone(),
                })
                .collect();
            out.push_str(&format!("  Stage {}: {}\n", depth + 1, names.join(", ")));
        }
        let manual = self.unconfigured_sources();
        if !manual.is_empty() {
            let manual: Vec<_> = manual.into_iter().collect();
            out.push_str(&format!("  Manual review: {}\n", manual.join(", ")));
        }
        out
    }
}

impl std::fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionPlan")
            .field("graph", &self.graph)
            .field("tasks", &self.tasks.keys().collect::<Vec<_>>())
            .field("rubric", &self.rubric.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::CommandSpec;

    fn command_spec(name: &str, deps: &[&str]) -> AnalysisTaskSpec {
        let mut spec = AnalysisTaskSpec::new(name);
        spec.depends_on = deps.iter().map(|d| d.to_string()).collect();
        spec.command = Some(CommandSpec {
            program: "true".to_string(),
            args: vec![],
            result_file: "result.json".to_string(),
            env: BTreeMap::new(),
        });
        spec
    }

    #[test]
    fn test_plan_describes_stages_and_manual_sources() {
        let rubric = Arc::new(Rubric::builtin().unwrap());
        let mut disabled = command_spec("performance", &["fetch_repo"]);
        disabled.enabled = false;
        let plan = ExecutionPlan::new(
            vec![
                command_spec("fetch_repo", &[]),
                command_spec("accessibility", &["fetch_repo"]),
                disabled,
            ],
            &TaskRegistry::new(),
            rubric,
        )
        .unwrap();

        assert_eq!(plan.tasks.len(), 2);
        let described = plan.describe();
        assert!(described.contains("Stage 1: fetch_repo"));
        assert!(described.contains("Stage 2: accessibility, performance (disabled)"));
        assert!(described.contains("manual_review"));
        assert!(plan.unconfigured_sources().contains("deployment"));
    }

    #[test]
    fn test_run_context_paths() {
        let ctx = RunContext::new("/tmp/out", OrchestratorSettings::default());
        assert_eq!(ctx.submission_dir("s1"), PathBuf::from("/tmp/out/s1"));
        assert!(!ctx.cancel.is_cancelled());
    }
}
