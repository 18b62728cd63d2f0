//! Batch runner.
//!
//! Submissions run with bounded parallelism, each in its own tokio task. A
//! submission always ends with a [`SubmissionOutcome`]; a panic inside one is
//! reported as `Crashed` and never reaches the others.

use super::executor::run_tasks;
use super::{ExecutionPlan, RunContext};
use crate::error::SetupError;
use crate::models::{SubmissionRecord, Total};
use crate::registry::RejectedRow;
use crate::report::{
    generate_execution_log, write_execution_log, write_report, ReportAggregator, ReportOptions,
    SubmissionLayout,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// How one submission ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum SubmissionOutcome {
    /// Every task reached a terminal status and the report was written.
    Completed,
    /// Aborted before any task ran.
    SetupFailed(String),
    /// Tasks ran but the report could not be written.
    ReportWriteFailed(String),
    /// The run was cancelled. A report is written if tasks had started.
    Cancelled,
    /// The submission's worker panicked.
    Crashed(String),
}

impl SubmissionOutcome {
    /// Whether the submission ended without a usable report.
    pub fn is_aborted(&self) -> bool {
        matches!(
            self,
            Self::SetupFailed(_) | Self::ReportWriteFailed(_) | Self::Crashed(_)
        )
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Completed => "✅",
            Self::SetupFailed(_) => "🚫",
            Self::ReportWriteFailed(_) => "💾",
            Self::Cancelled => "🛑",
            Self::Crashed(_) => "💥",
        }
    }
}

impl fmt::Display for SubmissionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::SetupFailed(reason) => write!(f, "setup failed: {}", reason),
            Self::ReportWriteFailed(reason) => write!(f, "report write failed: {}", reason),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Crashed(reason) => write!(f, "crashed: {}", reason),
        }
    }
}

/// Result of one submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionSummary {
    pub submission_id: String,
    pub outcome: SubmissionOutcome,
    /// Present whenever a report was built.
    pub total: Option<Total>,
}

/// Results of a whole batch, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub submissions: Vec<SubmissionSummary>,
}

impl BatchSummary {
    pub fn completed(&self) -> usize {
        self.count(|o| *o == SubmissionOutcome::Completed)
    }

    pub fn aborted(&self) -> usize {
        self.count(SubmissionOutcome::is_aborted)
    }

    pub fn cancelled(&self) -> usize {
        self.count(|o| *o == SubmissionOutcome::Cancelled)
    }

    /// Add rows of the submission list that never loaded, as setup failures.
    pub fn with_rejected(mut self, rows: &[RejectedRow]) -> Self {
        self.submissions.extend(rows.iter().map(|row| SubmissionSummary {
            submission_id: row.label(),
            outcome: SubmissionOutcome::SetupFailed(row.reason.clone()),
            total: None,
        }));
        self
    }

    fn count(&self, pred: impl Fn(&SubmissionOutcome) -> bool) -> usize {
        self.submissions.iter().filter(|s| pred(&s.outcome)).count()
    }
}

/// Runs submissions against a resolved plan.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    plan: Arc<ExecutionPlan>,
    report_options: ReportOptions,
    /// Parameters every submission must provide.
    required_parameters: Arc<Vec<String>>,
}

impl Orchestrator {
    pub fn new(plan: ExecutionPlan) -> Self {
        Self {
            plan: Arc::new(plan),
            report_options: ReportOptions::default(),
            required_parameters: Arc::new(Vec::new()),
        }
    }

    pub fn with_report_options(mut self, options: ReportOptions) -> Self {
        self.report_options = options;
        self
    }

    pub fn with_required_parameters(mut self, params: Vec<String>) -> Self {
        self.required_parameters = Arc::new(params);
        self
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Process every submission, at most `workers` at a time.
    pub async fn run_batch(&self, submissions: &[SubmissionRecord], ctx: &RunContext) -> BatchSummary {
        let workers = ctx.settings.workers.max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let progress = progress_bar(submissions.len(), ctx.settings.show_progress);

        info!(
            submissions = submissions.len(),
            workers,
            task_parallelism = ctx.settings.task_parallelism,
            "starting batch"
        );

        let mut handles = Vec::with_capacity(submissions.len());
        let mut undispatched = Vec::new();

        for submission in submissions {
            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => permit.ok(),
                _ = ctx.cancel.cancelled() => None,
            };
            let Some(permit) = permit else {
                undispatched.push(submission.id.clone());
                continue;
            };
            if ctx.cancel.is_cancelled() {
                undispatched.push(submission.id.clone());
                continue;
            }

            let orchestrator = self.clone();
            let ctx = ctx.clone();
            let record = Arc::new(submission.clone());
            let progress = progress.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let summary = orchestrator.process_submission(record, &ctx).await;
                if let Some(pb) = &progress {
                    pb.inc(1);
                    pb.set_message(summary.submission_id.clone());
                }
                summary
            });
            handles.push((submission.id.clone(), handle));
        }

        let mut summary = BatchSummary::default();
        let joined = futures::future::join_all(handles.into_iter().map(|(id, handle)| async move {
            (id, handle.await)
        }))
        .await;

        for (id, result) in joined {
            match result {
                Ok(submission) => summary.submissions.push(submission),
                Err(e) => {
                    let reason = if e.is_panic() {
                        "worker panicked".to_string()
                    } else {
                        e.to_string()
                    };
                    error!(submission = %id, "submission crashed: {}", reason);
                    if let Some(pb) = &progress {
                        pb.inc(1);
                    }
                    summary.submissions.push(SubmissionSummary {
                        submission_id: id,
                        outcome: SubmissionOutcome::Crashed(reason),
                        total: None,
                    });
                }
            }
        }

        for id in undispatched {
            warn!(submission = %id, "not started: run cancelled");
            summary.submissions.push(SubmissionSummary {
                submission_id: id,
                outcome: SubmissionOutcome::Cancelled,
                total: None,
            });
        }

        if let Some(pb) = &progress {
            pb.finish_and_clear();
        }

        let order: std::collections::HashMap<&str, usize> = submissions
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();
        summary
            .submissions
            .sort_by_key(|s| order.get(s.submission_id.as_str()).copied().unwrap_or(usize::MAX));

        info!(
            completed = summary.completed(),
            aborted = summary.aborted(),
            cancelled = summary.cancelled(),
            "batch finished"
        );
        summary
    }

    /// Run one submission end to end: setup checks, tasks, scoring, report.
    pub async fn process_submission(
        &self,
        submission: Arc<SubmissionRecord>,
        ctx: &RunContext,
    ) -> SubmissionSummary {
        let id = submission.id.clone();
        let layout = SubmissionLayout::new(&ctx.output_root, &id);
        let summary = |outcome, total| SubmissionSummary {
            submission_id: id.clone(),
            outcome,
            total,
        };

        if let Err(e) = layout.clear_report() {
            warn!(submission = %id, "{}", e);
        }

        if let Err(e) = self.check_setup(&submission, &layout) {
            error!(submission = %id, "setup failed: {}", e);
            let log = generate_execution_log(&id, &[], &[e.to_string()]);
            if layout.dir().is_dir() {
                if let Err(write_err) = write_execution_log(&layout, &log) {
                    warn!(submission = %id, "{}", write_err);
                }
            }
            return summary(SubmissionOutcome::SetupFailed(e.to_string()), None);
        }

        info!(submission = %id, "assessing submission");
        let results = run_tasks(&self.plan, submission.clone(), ctx).await;
        let report = ReportAggregator::new(&self.plan.rubric).assess(&id, results);
        let total = report.total.clone();

        let log = generate_execution_log(&id, &report.task_results, &[]);
        let written = write_execution_log(&layout, &log)
            .and_then(|_| write_report(&layout, &report, &self.report_options));
        if let Err(e) = written {
            error!(submission = %id, "{}", e);
            return summary(SubmissionOutcome::ReportWriteFailed(e.to_string()), Some(total));
        }

        info!(submission = %id, score = %total.display(), "report written");
        if ctx.cancel.is_cancelled() {
            summary(SubmissionOutcome::Cancelled, Some(total))
        } else {
            summary(SubmissionOutcome::Completed, Some(total))
        }
    }

    fn check_setup(
        &self,
        submission: &SubmissionRecord,
        layout: &SubmissionLayout,
    ) -> Result<(), SetupError> {
        for param in self.required_parameters.iter() {
            if !submission.has_param(param) {
                return Err(SetupError::MissingParameter(param.clone()));
            }
            if submission.param(param).is_none() {
                return Err(SetupError::ParameterNotProvided(param.clone()));
            }
        }
        layout.create()
    }
}

fn progress_bar(len: usize, show: bool) -> Option<ProgressBar> {
    if !show {
        return None;
    }
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    Some(pb)
}
