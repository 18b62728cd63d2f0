//! Data models for the assessment engine.
//!
//! This module contains the core data structures shared by the orchestrator,
//! the rubric mapper, the report aggregator and the results extractor.

use crate::error::TransitionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// One unit of work to be assessed.
///
/// A parameter value of `None` means the submission explicitly did not
/// provide it (the "not provided" sentinel in the submission list).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    /// Unique identifier of the submission.
    pub id: String,
    /// Named parameters such as repository or deployment locations.
    pub params: BTreeMap<String, Option<String>>,
}

impl SubmissionRecord {
    /// Creates a record with no parameters.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            params: BTreeMap::new(),
        }
    }

    /// Builder-style helper to add a parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: Option<&str>) -> Self {
        self.params.insert(name.into(), value.map(str::to_string));
        self
    }

    /// Returns the value of a provided parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(|v| v.as_deref())
    }

    /// Whether the column exists at all, provided or not.
    pub fn has_param(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }
}

/// Lifecycle status of one task for one submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not started yet.
    #[default]
    Pending,
    /// Currently executing.
    Running,
    /// Finished and produced a structured output.
    Success,
    /// Finished with an error captured at the task boundary.
    Failed,
    /// Never attempted (disabled, dependency not met, parameter missing, cancelled).
    Skipped,
    /// Abandoned after exceeding its time budget.
    TimedOut,
}

impl TaskStatus {
    /// Returns true if the status can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Skipped | Self::TimedOut
        )
    }

    /// Returns true for terminal statuses other than `Success`.
    pub fn is_unsuccessful(&self) -> bool {
        self.is_terminal() && *self != Self::Success
    }

    /// Allowed moves: Pending -> Running | Skipped, Running -> terminal.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Running | Self::Skipped),
            Self::Running => matches!(next, Self::Success | Self::Failed | Self::TimedOut),
            _ => false,
        }
    }

    /// Returns an emoji marker for logs and reports.
    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Pending => "⏳",
            Self::Running => "🔄",
            Self::Success => "✅",
            Self::Failed => "❌",
            Self::Skipped => "⏭️",
            Self::TimedOut => "⏱️",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Success => write!(f, "Success"),
            Self::Failed => write!(f, "Failed"),
            Self::Skipped => write!(f, "Skipped"),
            Self::TimedOut => write!(f, "TimedOut"),
        }
    }
}

/// Structured record emitted by an analysis task.
///
/// `fields` is what the rubric mapper reads; `summary` is prose for human
/// review only and is never parsed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    /// Typed, task-defined fields (percentages, band labels, counts).
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    /// Human-readable summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Artifact paths relative to the task output directory.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
}

impl TaskOutput {
    /// Builder-style helper to set a field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Builder-style helper to set the summary.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Returns a field value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Outcome of one task for one submission.
///
/// Status changes go through the transition methods, which refuse to move a
/// terminal result. `diagnostic` is set iff the final status is not `Success`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub submission_id: String,
    pub task: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<TaskOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub attempts: u32,
}

impl TaskResult {
    /// Creates a pending result.
    pub fn pending(submission_id: &str, task: &str) -> Self {
        Self {
            submission_id: submission_id.to_string(),
            task: task.to_string(),
            status: TaskStatus::Pending,
            output: None,
            diagnostic: None,
            started_at: None,
            finished_at: None,
            duration_ms: 0,
            attempts: 0,
        }
    }

    /// Pending -> Running.
    pub fn start(&mut self, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(TaskStatus::Running)?;
        self.started_at = Some(at);
        Ok(())
    }

    /// Running -> Success.
    pub fn succeed(
        &mut self,
        output: TaskOutput,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(TaskStatus::Success)?;
        self.output = Some(output);
        self.stamp_finish(at);
        Ok(())
    }

    /// Running -> Failed.
    pub fn fail(
        &mut self,
        diagnostic: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(TaskStatus::Failed)?;
        self.diagnostic = Some(diagnostic.into());
        self.stamp_finish(at);
        Ok(())
    }

    /// Running -> TimedOut. Any partial output is discarded.
    pub fn time_out(
        &mut self,
        diagnostic: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(TaskStatus::TimedOut)?;
        self.output = None;
        self.diagnostic = Some(diagnostic.into());
        self.stamp_finish(at);
        Ok(())
    }

    /// Pending -> Skipped.
    pub fn skip(&mut self, diagnostic: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(TaskStatus::Skipped)?;
        self.diagnostic = Some(diagnostic.into());
        Ok(())
    }

    fn transition(&mut self, next: TaskStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                task: self.task.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    fn stamp_finish(&mut self, at: DateTime<Utc>) {
        self.finished_at = Some(at);
        if let Some(started) = self.started_at {
            self.duration_ms = (at - started).num_milliseconds().max(0) as u64;
        }
    }
}

/// Whether a criterion received an automated score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreStatus {
    Scored,
    /// No usable result; pending manual review. Distinct from a zero score.
    Unscored,
}

/// Score for one criterion of one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub criterion_id: String,
    pub category_id: String,
    pub status: ScoreStatus,
    /// Percentage the points were interpolated from (Scored only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    /// Band the percentage fell into (Scored only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub band: Option<String>,
    /// Awarded points. Always 0 for Unscored entries, which are never summed.
    pub points: f64,
    /// Criterion weight.
    pub max_points: f64,
    /// Whether the criterion belongs to the bonus category.
    #[serde(default)]
    pub bonus: bool,
    /// Why the criterion is Unscored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ScoreEntry {
    pub fn is_scored(&self) -> bool {
        self.status == ScoreStatus::Scored
    }
}

/// Reduced score for one submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Total {
    /// Sum of scored mandatory points, capped at 100.
    pub mandatory: f64,
    /// Sum of scored bonus points, capped at the bonus ceiling.
    pub bonus: f64,
    /// `mandatory + bonus`, always within [0, 105].
    pub total: f64,
    /// Weight of the mandatory criteria that were actually scored.
    pub mandatory_possible: f64,
    /// Number of criteria pending manual review.
    pub unscored_count: usize,
    /// Ids of the criteria pending manual review, in rubric order.
    pub unscored: Vec<String>,
}

impl Total {
    /// Human-readable rendering, e.g. `82.00/100 (2 criteria pending manual review)`.
    pub fn display(&self) -> String {
        let mut out = format!("{:.2}/100", self.mandatory);
        if self.bonus > 0.0 {
            out.push_str(&format!(" + {:.2} bonus", self.bonus));
        }
        match self.unscored_count {
            0 => {}
            1 => out.push_str(" (1 criterion pending manual review)"),
            n => out.push_str(&format!(" ({} criteria pending manual review)", n)),
        }
        out
    }
}

/// Report section for one criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionSection {
    pub criterion_id: String,
    pub name: String,
    pub weight: f64,
    pub source_task: String,
    pub source_field: String,
    /// Status of the source task; `None` when no such task was configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_status: Option<TaskStatus>,
    pub entry: ScoreEntry,
    /// Summary prose from the source task, for human review.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Report section for one rubric category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySection {
    pub category_id: String,
    pub name: String,
    pub bonus: bool,
    pub weight: f64,
    /// Sum of scored points in this category.
    pub points: f64,
    pub unscored_count: usize,
    pub criteria: Vec<CriterionSection>,
}

/// Immutable per-submission assessment snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionReport {
    pub submission_id: String,
    pub rubric_name: String,
    /// Sections in rubric declaration order.
    pub sections: Vec<CategorySection>,
    /// Task results in configuration order.
    pub task_results: Vec<TaskResult>,
    /// Score entries in rubric order.
    pub score_entries: Vec<ScoreEntry>,
    pub total: Total,
    /// Unscored-criterion warnings.
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl SubmissionReport {
    /// Looks up the score entry for a criterion.
    pub fn entry(&self, criterion_id: &str) -> Option<&ScoreEntry> {
        self.score_entries
            .iter()
            .find(|e| e.criterion_id == criterion_id)
    }

    /// Looks up the result of a task.
    pub fn task_result(&self, task: &str) -> Option<&TaskResult> {
        self.task_results.iter().find(|r| r.task == task)
    }
}
