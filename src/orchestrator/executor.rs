//! Runs one submission's tasks along the dependency graph.
//!
//! Every attempt runs in its own tokio task, so an error or a panic inside a
//! task is captured at that boundary and recorded as `Failed`. Nothing a task
//! does can abort its siblings or other submissions.

use super::{ExecutionPlan, RunContext};
use crate::models::{SubmissionRecord, TaskOutput, TaskResult, TaskStatus};
use crate::rubric::RubricMapper;
use crate::task::{AnalysisTask, AnalysisTaskSpec, RateLimiter, TaskContext};
use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// How the last attempt of a task ended.
#[derive(Debug)]
enum Outcome {
    Success(TaskOutput),
    Failed(String),
    TimedOut(String),
}

impl Outcome {
    fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

struct Finished {
    task: String,
    outcome: Outcome,
    attempts: u32,
}

/// Run every configured task for one submission and return one result per
/// task, in configuration order. All results are terminal.
#[instrument(skip_all, fields(submission = %submission.id))]
pub async fn run_tasks(
    plan: &ExecutionPlan,
    submission: Arc<SubmissionRecord>,
    ctx: &RunContext,
) -> Vec<TaskResult> {
    let graph = &plan.graph;
    let submission_dir = ctx.submission_dir(&submission.id);
    let mapper = RubricMapper::new(&plan.rubric);
    let permits = Arc::new(Semaphore::new(ctx.settings.task_parallelism.max(1)));

    let mut results: HashMap<String, TaskResult> = graph
        .names()
        .map(|name| (name.to_string(), TaskResult::pending(&submission.id, name)))
        .collect();

    for spec in graph.specs() {
        if let Some(reason) = skip_reason(plan, spec, &submission) {
            skip(&mut results, &spec.name, reason);
        }
    }

    let mut running: FuturesUnordered<BoxFuture<'static, Finished>> = FuturesUnordered::new();

    loop {
        propagate_skips(plan, &mut results);

        if ctx.cancel.is_cancelled() {
            for name in graph.names() {
                if results[name].status == TaskStatus::Pending {
                    skip(&mut results, name, "run cancelled".to_string());
                }
            }
        } else {
            for spec in graph.specs() {
                if !is_ready(plan, &results, &spec.name) {
                    continue;
                }
                let permit = match permits.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let Some(task) = plan.tasks.get(&spec.name).cloned() else {
                    continue;
                };

                let dependencies: BTreeMap<String, TaskOutput> = graph
                    .upstream(&spec.name)
                    .iter()
                    .filter_map(|dep| {
                        results[dep]
                            .output
                            .clone()
                            .map(|output| (dep.clone(), output))
                    })
                    .collect();

                let task_ctx = TaskContext {
                    submission: submission.clone(),
                    task: spec.name.clone(),
                    submission_dir: submission_dir.clone(),
                    output_dir: submission_dir.join("tasks").join(&spec.name),
                    dependencies,
                    cancel: ctx.cancel.clone(),
                };
                let limiter = spec.rate_limited.then(|| ctx.limiter.clone());

                if let Some(result) = results.get_mut(&spec.name) {
                    if let Err(e) = result.start(Utc::now()) {
                        warn!("{}", e);
                        continue;
                    }
                }
                info!(task = %spec.name, "task started");

                let policy = AttemptPolicy {
                    timeout: spec.timeout(),
                    transient: spec.transient,
                    retry_backoff: ctx.settings.retry_backoff,
                    grace_period: ctx.settings.grace_period,
                };
                let cancel = ctx.cancel.clone();
                running.push(
                    async move {
                        let finished = run_attempts(task, task_ctx, policy, limiter, cancel).await;
                        drop(permit);
                        finished
                    }
                    .boxed(),
                );
            }
        }

        let Some(finished) = running.next().await else {
            break;
        };
        record(&mapper, &mut results, finished);
    }

    // Only reachable with pending tasks if something upstream never resolved.
    for name in graph.names() {
        if results[name].status == TaskStatus::Pending {
            skip(&mut results, name, "dependencies never resolved".to_string());
        }
    }

    graph
        .names()
        .filter_map(|name| results.remove(name))
        .collect()
}

/// Reasons a task is skipped before the run starts.
fn skip_reason(
    plan: &ExecutionPlan,
    spec: &AnalysisTaskSpec,
    submission: &SubmissionRecord,
) -> Option<String> {
    if !spec.enabled {
        return Some("disabled by configuration".to_string());
    }
    if !plan.tasks.contains_key(&spec.name) {
        return Some("no implementation registered".to_string());
    }
    spec.required_parameters()
        .into_iter()
        .find(|param| submission.param(param).is_none())
        .map(|param| format!("parameter '{}' not provided", param))
}

/// Skip every pending task whose dependency ended without success, until no
/// more change. This makes skips transitive.
fn propagate_skips(plan: &ExecutionPlan, results: &mut HashMap<String, TaskResult>) {
    loop {
        let mut changed = false;
        for name in plan.graph.names() {
            if results[name].status != TaskStatus::Pending {
                continue;
            }
            let blocked = plan.graph.upstream(name).iter().find_map(|dep| {
                let status = results[dep].status;
                status
                    .is_unsuccessful()
                    .then(|| format!("dependency '{}' {}", dep, describe_status(status)))
            });
            if let Some(reason) = blocked {
                skip(results, name, reason);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

fn describe_status(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Failed => "failed",
        TaskStatus::TimedOut => "timed out",
        TaskStatus::Skipped => "was skipped",
        TaskStatus::Success => "succeeded",
        TaskStatus::Pending | TaskStatus::Running => "did not finish",
    }
}

fn is_ready(plan: &ExecutionPlan, results: &HashMap<String, TaskResult>, name: &str) -> bool {
    results[name].status == TaskStatus::Pending
        && plan
            .graph
            .upstream(name)
            .iter()
            .all(|dep| results[dep].status == TaskStatus::Success)
}

fn skip(results: &mut HashMap<String, TaskResult>, name: &str, reason: String) {
    if let Some(result) = results.get_mut(name) {
        debug!(task = %name, reason = %reason, "task skipped");
        if let Err(e) = result.skip(reason) {
            warn!("{}", e);
        }
    }
}

fn record(mapper: &RubricMapper<'_>, results: &mut HashMap<String, TaskResult>, finished: Finished) {
    let Some(result) = results.get_mut(&finished.task) else {
        return;
    };
    result.attempts = finished.attempts;
    let now = Utc::now();

    let outcome = match finished.outcome {
        Outcome::Success(output) => match mapper.check_output(&finished.task, &output) {
            Ok(()) => Outcome::Success(output),
            Err(reason) => Outcome::Failed(reason),
        },
        other => other,
    };

    let transition = match outcome {
        Outcome::Success(output) => {
            info!(task = %finished.task, attempts = finished.attempts, "task succeeded");
            result.succeed(output, now)
        }
        Outcome::Failed(reason) => {
            warn!(task = %finished.task, attempts = finished.attempts, "task failed: {}", reason);
            result.fail(reason, now)
        }
        Outcome::TimedOut(reason) => {
            warn!(task = %finished.task, attempts = finished.attempts, "task timed out: {}", reason);
            result.time_out(reason, now)
        }
    };
    if let Err(e) = transition {
        warn!("{}", e);
    }
}

#[derive(Debug, Clone, Copy)]
struct AttemptPolicy {
    timeout: Duration,
    transient: bool,
    retry_backoff: Duration,
    grace_period: Duration,
}

/// Run a task, retrying once if it is transient.
async fn run_attempts(
    task: Arc<dyn AnalysisTask>,
    ctx: TaskContext,
    policy: AttemptPolicy,
    limiter: Option<Arc<RateLimiter>>,
    cancel: CancellationToken,
) -> Finished {
    let name = ctx.task.clone();
    let max_attempts = if policy.transient { 2 } else { 1 };
    let mut attempts = 0;

    let outcome = loop {
        attempts += 1;
        let outcome = attempt(task.clone(), ctx.clone(), policy, limiter.as_deref(), &cancel).await;
        if outcome.is_success() || attempts >= max_attempts || cancel.is_cancelled() {
            break outcome;
        }

        debug!(
            task = %name,
            backoff_ms = policy.retry_backoff.as_millis() as u64,
            "retrying transient task"
        );
        tokio::select! {
            _ = tokio::time::sleep(policy.retry_backoff) => {}
            _ = cancel.cancelled() => break outcome,
        }
    };

    Finished {
        task: name,
        outcome,
        attempts,
    }
}

/// One attempt under the task timeout. A rate-limited task first waits for a
/// limiter slot, and that wait is not charged to its timeout. The slot is held
/// until the attempt ends. On cancellation the attempt gets the grace period
/// and is then abandoned.
async fn attempt(
    task: Arc<dyn AnalysisTask>,
    ctx: TaskContext,
    policy: AttemptPolicy,
    limiter: Option<&RateLimiter>,
    cancel: &CancellationToken,
) -> Outcome {
    if let Err(e) = tokio::fs::create_dir_all(&ctx.output_dir).await {
        return Outcome::Failed(format!(
            "failed to create output directory {}: {}",
            ctx.output_dir.display(),
            e
        ));
    }

    let _slot = match limiter {
        Some(limiter) => tokio::select! {
            slot = limiter.acquire() => match slot {
                Ok(slot) => Some(slot),
                Err(e) => return Outcome::Failed(e.to_string()),
            },
            _ = cancel.cancelled() => {
                return Outcome::TimedOut("abandoned after run cancelled".to_string());
            }
        },
        None => None,
    };

    let mut handle: JoinHandle<_> = tokio::spawn(async move { task.run(ctx).await });

    tokio::select! {
        joined = tokio::time::timeout(policy.timeout, &mut handle) => match joined {
            Ok(joined) => from_join(joined),
            Err(_) => {
                handle.abort();
                Outcome::TimedOut(format!(
                    "exceeded timeout of {}",
                    format_duration(policy.timeout)
                ))
            }
        },
        _ = cancel.cancelled() => {
            match tokio::time::timeout(policy.grace_period, &mut handle).await {
                Ok(joined) => from_join(joined),
                Err(_) => {
                    handle.abort();
                    Outcome::TimedOut("abandoned after run cancelled".to_string())
                }
            }
        }
    }
}

fn from_join(joined: Result<Result<TaskOutput, crate::error::TaskError>, JoinError>) -> Outcome {
    match joined {
        Ok(Ok(output)) => Outcome::Success(output),
        Ok(Err(e)) => Outcome::Failed(e.to_string()),
        Err(e) if e.is_panic() => Outcome::Failed(format!("panicked: {}", panic_message(e.into_panic()))),
        Err(e) => Outcome::Failed(format!("task aborted: {}", e)),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::orchestrator::OrchestratorSettings;
    use crate::rubric::Rubric;
    use crate::task::TaskRegistry;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    const RUBRIC: &str = r#"
name = "Mini"

[[categories]]
id = "core"
name = "Core"

[[categories.criteria]]
id = "quality"
name = "Quality"
weight = 50
source = { task = "lint", field = "percent" }

[[categories.criteria]]
id = "speed"
name = "Speed"
weight = 50
source = { task = "perf", field = "percent" }
"#;

    enum Behavior {
        Succeed(f64),
        Fail,
        Panic,
        Sleep(Duration),
        FlakyOnce,
        MissingField,
    }

    struct Scripted {
        name: String,
        behavior: Behavior,
        calls: Arc<AtomicU32>,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn new(name: &str, behavior: Behavior) -> Self {
            Self {
                name: name.to_string(),
                behavior,
                calls: Arc::new(AtomicU32::new(0)),
                in_flight: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl AnalysisTask for Scripted {
        fn name(&self) -> &str {
            &self.name
        }

        async fn run(&self, ctx: TaskContext) -> Result<TaskOutput, TaskError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            assert!(ctx.output_dir.is_dir());
            match &self.behavior {
                Behavior::Succeed(p) => Ok(TaskOutput::default().with_field("percent", *p)),
                Behavior::Fail => Err(TaskError::msg("analyzer crashed")),
                Behavior::Panic => panic!("index out of bounds"),
                Behavior::Sleep(d) => {
                    tokio::time::sleep(*d).await;
                    Ok(TaskOutput::default().with_field("percent", 90))
                }
                Behavior::FlakyOnce if call == 1 => Err(TaskError::msg("network hiccup")),
                Behavior::FlakyOnce => Ok(TaskOutput::default().with_field("percent", 75)),
                Behavior::MissingField => Ok(TaskOutput::default().with_field("other", 1)),
            }
        }
    }

    fn spec(name: &str, deps: &[&str]) -> AnalysisTaskSpec {
        let mut spec = AnalysisTaskSpec::new(name);
        spec.depends_on = deps.iter().map(|d| d.to_string()).collect();
        spec
    }

    fn plan(specs: Vec<AnalysisTaskSpec>, tasks: Vec<Scripted>) -> ExecutionPlan {
        let mut registry = TaskRegistry::new();
        for task in tasks {
            registry.register(task);
        }
        let rubric = Arc::new(Rubric::from_toml_str(RUBRIC).unwrap());
        ExecutionPlan::new(specs, &registry, rubric).unwrap()
    }

    fn context(root: &Path) -> RunContext {
        let settings = OrchestratorSettings {
            retry_backoff: Duration::from_millis(10),
            grace_period: Duration::from_millis(50),
            show_progress: false,
            ..Default::default()
        };
        RunContext::new(root, settings)
    }

    fn submission() -> Arc<SubmissionRecord> {
        Arc::new(
            SubmissionRecord::new("s1")
                .with_param("repo_url", Some("https://example.com/s1.git"))
                .with_param("deploy_url", None),
        )
    }

    fn status_of(results: &[TaskResult], task: &str) -> TaskStatus {
        results.iter().find(|r| r.task == task).unwrap().status
    }

    #[tokio::test]
    async fn test_failure_is_isolated_and_skips_dependents() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan(
            vec![
                spec("fetch", &[]),
                spec("lint", &["fetch"]),
                spec("report", &["lint"]),
                spec("perf", &[]),
            ],
            vec![
                Scripted::new("fetch", Behavior::Fail),
                Scripted::new("lint", Behavior::Succeed(80.0)),
                Scripted::new("report", Behavior::Succeed(80.0)),
                Scripted::new("perf", Behavior::Succeed(70.0)),
            ],
        );

        let results = run_tasks(&plan, submission(), &context(dir.path())).await;
        let names: Vec<_> = results.iter().map(|r| r.task.as_str()).collect();
        assert_eq!(names, vec!["fetch", "lint", "report", "perf"]);
        assert!(results.iter().all(|r| r.status.is_terminal()));

        assert_eq!(status_of(&results, "fetch"), TaskStatus::Failed);
        assert_eq!(status_of(&results, "lint"), TaskStatus::Skipped);
        assert_eq!(status_of(&results, "report"), TaskStatus::Skipped);
        assert_eq!(status_of(&results, "perf"), TaskStatus::Success);
        assert_eq!(
            results[1].diagnostic.as_deref(),
            Some("dependency 'fetch' failed")
        );
        assert_eq!(
            results[2].diagnostic.as_deref(),
            Some("dependency 'lint' was skipped")
        );
        assert!(dir.path().join("s1/tasks/fetch").is_dir());
    }

    #[tokio::test]
    async fn test_panic_is_captured_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan(
            vec![spec("lint", &[]), spec("perf", &[])],
            vec![
                Scripted::new("lint", Behavior::Panic),
                Scripted::new("perf", Behavior::Succeed(60.0)),
            ],
        );

        let results = run_tasks(&plan, submission(), &context(dir.path())).await;
        assert_eq!(results[0].status, TaskStatus::Failed);
        assert!(results[0]
            .diagnostic
            .as_deref()
            .unwrap()
            .contains("index out of bounds"));
        assert_eq!(results[1].status, TaskStatus::Success);
    }

    #[tokio::test]
    async fn test_timeout_discards_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut perf = spec("perf", &[]);
        perf.timeout_seconds = 1;
        let plan = plan(
            vec![perf],
            vec![Scripted::new("perf", Behavior::Sleep(Duration::from_secs(30)))],
        );

        let results = run_tasks(&plan, submission(), &context(dir.path())).await;
        assert_eq!(results[0].status, TaskStatus::TimedOut);
        assert!(results[0].output.is_none());
        assert_eq!(
            results[0].diagnostic.as_deref(),
            Some("exceeded timeout of 1s")
        );
    }

    #[tokio::test]
    async fn test_timed_out_dependency_skips_dependents() {
        let dir = tempfile::tempdir().unwrap();
        let mut fetch = spec("fetch", &[]);
        fetch.timeout_seconds = 1;
        let plan = plan(
            vec![fetch, spec("lint", &["fetch"]), spec("perf", &["lint"])],
            vec![
                Scripted::new("fetch", Behavior::Sleep(Duration::from_secs(30))),
                Scripted::new("lint", Behavior::Succeed(80.0)),
                Scripted::new("perf", Behavior::Succeed(80.0)),
            ],
        );

        let results = run_tasks(&plan, submission(), &context(dir.path())).await;
        assert_eq!(status_of(&results, "fetch"), TaskStatus::TimedOut);
        assert_eq!(status_of(&results, "lint"), TaskStatus::Skipped);
        assert_eq!(status_of(&results, "perf"), TaskStatus::Skipped);
        assert_eq!(
            results[1].diagnostic.as_deref(),
            Some("dependency 'fetch' timed out")
        );
        assert!(results[1..].iter().all(|r| r.attempts == 0));
    }

    #[tokio::test]
    async fn test_rate_limiter_wait_is_not_charged_to_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut perf = spec("perf", &[]);
        perf.timeout_seconds = 1;
        perf.rate_limited = true;
        let plan = plan(
            vec![perf],
            vec![Scripted::new("perf", Behavior::Sleep(Duration::from_millis(700)))],
        );
        let ctx = context(dir.path()).with_limiter(RateLimiter::new(1, Duration::ZERO));
        let first = Arc::new(SubmissionRecord::new("s1"));
        let second = Arc::new(SubmissionRecord::new("s2"));

        let start = tokio::time::Instant::now();
        let (a, b) = tokio::join!(
            run_tasks(&plan, first, &ctx),
            run_tasks(&plan, second, &ctx)
        );

        // one slot: the two runs were serialized, yet neither timed out
        assert!(start.elapsed() >= Duration::from_millis(1400));
        assert_eq!(a[0].status, TaskStatus::Success);
        assert_eq!(b[0].status, TaskStatus::Success);
        assert_eq!(ctx.limiter.available(), 1);
    }

    #[tokio::test]
    async fn test_transient_task_is_retried_once() {
        let dir = tempfile::tempdir().unwrap();
        let flaky = Scripted::new("perf", Behavior::FlakyOnce);
        let calls = flaky.calls.clone();
        let mut perf = spec("perf", &[]);
        perf.transient = true;
        let plan = plan(vec![perf], vec![flaky]);

        let results = run_tasks(&plan, submission(), &context(dir.path())).await;
        assert_eq!(results[0].status, TaskStatus::Success);
        assert_eq!(results[0].attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_transient_failure_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let flaky = Scripted::new("perf", Behavior::FlakyOnce);
        let calls = flaky.calls.clone();
        let plan = plan(vec![spec("perf", &[])], vec![flaky]);

        let results = run_tasks(&plan, submission(), &context(dir.path())).await;
        assert_eq!(results[0].status, TaskStatus::Failed);
        assert_eq!(results[0].attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_parameter_and_disabled_tasks_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut deploy = spec("deploy", &[]);
        deploy.requires = vec!["deploy_url".to_string()];
        let mut perf = spec("perf", &[]);
        perf.enabled = false;
        let plan = plan(
            vec![deploy, perf, spec("lint", &["perf"])],
            vec![
                Scripted::new("deploy", Behavior::Succeed(90.0)),
                Scripted::new("lint", Behavior::Succeed(90.0)),
            ],
        );

        let results = run_tasks(&plan, submission(), &context(dir.path())).await;
        assert_eq!(
            results[0].diagnostic.as_deref(),
            Some("parameter 'deploy_url' not provided")
        );
        assert_eq!(
            results[1].diagnostic.as_deref(),
            Some("disabled by configuration")
        );
        assert_eq!(results[2].status, TaskStatus::Skipped);
        assert!(results.iter().all(|r| r.attempts == 0));
    }

    #[tokio::test]
    async fn test_success_without_rubric_field_fails() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan(
            vec![spec("lint", &[])],
            vec![Scripted::new("lint", Behavior::MissingField)],
        );

        let results = run_tasks(&plan, submission(), &context(dir.path())).await;
        assert_eq!(results[0].status, TaskStatus::Failed);
        assert_eq!(
            results[0].diagnostic.as_deref(),
            Some("output missing field 'percent'")
        );
    }

    #[tokio::test]
    async fn test_task_parallelism_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut specs = Vec::new();
        let mut tasks = Vec::new();
        for i in 0..6 {
            let name = format!("t{}", i);
            specs.push(spec(&name, &[]));
            let mut task = Scripted::new(&name, Behavior::Succeed(50.0));
            task.in_flight = in_flight.clone();
            task.peak = peak.clone();
            tasks.push(task);
        }
        let plan = plan(specs, tasks);

        let mut ctx = context(dir.path());
        ctx.settings.task_parallelism = 2;
        let results = run_tasks(&plan, submission(), &ctx).await;

        assert!(results.iter().all(|r| r.status == TaskStatus::Success));
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_undispatched_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan(
            vec![spec("slow", &[]), spec("after", &["slow"])],
            vec![
                Scripted::new("slow", Behavior::Sleep(Duration::from_secs(30))),
                Scripted::new("after", Behavior::Succeed(50.0)),
            ],
        );
        let ctx = context(dir.path());
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });

        let results = run_tasks(&plan, submission(), &ctx).await;
        assert_eq!(results[0].status, TaskStatus::TimedOut);
        assert_eq!(
            results[0].diagnostic.as_deref(),
            Some("abandoned after run cancelled")
        );
        assert_eq!(results[1].status, TaskStatus::Skipped);
    }

    #[tokio::test]
    async fn test_already_cancelled_run_dispatches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let lint = Scripted::new("lint", Behavior::Succeed(50.0));
        let calls = lint.calls.clone();
        let plan = plan(vec![spec("lint", &[])], vec![lint]);
        let ctx = context(dir.path());
        ctx.cancel.cancel();

        let results = run_tasks(&plan, submission(), &ctx).await;
        assert_eq!(results[0].status, TaskStatus::Skipped);
        assert_eq!(results[0].diagnostic.as_deref(), Some("run cancelled"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dependency_outputs_are_passed_down() {
        struct ReadsUpstream;

        #[async_trait]
        impl AnalysisTask for ReadsUpstream {
            fn name(&self) -> &str {
                "lint"
            }

            async fn run(&self, ctx: TaskContext) -> Result<TaskOutput, TaskError> {
                let upstream = ctx
                    .dependency("fetch")
                    .and_then(|o| o.field("percent"))
                    .and_then(|v| v.as_f64())
                    .ok_or_else(|| TaskError::msg("no upstream output"))?;
                Ok(TaskOutput::default().with_field("percent", upstream / 2.0))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut registry = TaskRegistry::new();
        registry.register(Scripted::new("fetch", Behavior::Succeed(80.0)));
        registry.register(ReadsUpstream);
        let rubric = Arc::new(Rubric::from_toml_str(RUBRIC).unwrap());
        let plan = ExecutionPlan::new(
            vec![spec("fetch", &[]), spec("lint", &["fetch"])],
            &registry,
            rubric,
        )
        .unwrap();

        let results = run_tasks(&plan, submission(), &context(dir.path())).await;
        let lint = results[1].output.as_ref().unwrap();
        assert_eq!(lint.field("percent").and_then(|v| v.as_f64()), Some(40.0));
    }
}
