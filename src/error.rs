//! Error taxonomy.
//!
//! Each stage of a run has its own error type. Only [`RegistryError`],
//! [`RubricError`] and [`GraphError`] can stop a whole run; everything else is
//! scoped to a single submission or a single task.

use crate::models::TaskStatus;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading the submission list.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read submission list {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("submission list is empty (no header row)")]
    Empty,

    #[error("submission list has no '{0}' column")]
    MissingIdColumn(String),

    #[error("line {line}: expected {expected} cells, found {found}")]
    CellCount {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("line {line}: unterminated quoted field")]
    UnterminatedQuote { line: usize },

    #[error("line {line}: submission id is empty")]
    EmptyId { line: usize },

    #[error("submission id '{id}' cannot be used as a directory name")]
    InvalidId { id: String },

    #[error("duplicate submission id '{id}'")]
    DuplicateId { id: String },

    #[error("unknown submission id '{0}'")]
    UnknownId(String),
}

/// Errors raised while loading or validating a rubric.
#[derive(Debug, Error)]
pub enum RubricError {
    #[error("failed to read rubric {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse rubric: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("mandatory criterion weights must sum to 100, got {actual}")]
    MandatoryWeight { actual: f64 },

    #[error("bonus weights must not exceed {ceiling}, got {actual}")]
    BonusWeight { actual: f64, ceiling: f64 },

    #[error("rubric declares more than one bonus category")]
    MultipleBonusCategories,

    #[error("duplicate {kind} id '{id}'")]
    DuplicateId { kind: &'static str, id: String },

    #[error("category '{0}' has no criteria")]
    EmptyCategory(String),

    #[error("criterion '{criterion}': {message}")]
    InvalidCriterion { criterion: String, message: String },
}

/// Errors raised while building the task dependency graph.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("task '{0}' is declared more than once")]
    DuplicateTask(String),

    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("task '{0}' depends on itself")]
    SelfDependency(String),

    #[error("dependency cycle between tasks: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("task '{0}' has no command and no registered implementation")]
    UnknownImplementation(String),
}

/// Setup failures that abort one submission before any task runs.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("required parameter '{0}' is missing")]
    MissingParameter(String),

    #[error("required parameter '{0}' is not provided")]
    ParameterNotProvided(String),

    #[error("failed to create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures captured inside a task boundary. These never escape the
/// orchestrator; they become a `Failed` task result.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    Execution(String),

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process exited with {status}: {stderr}")]
    NonZeroExit { status: String, stderr: String },

    #[error("invalid task output: {0}")]
    InvalidOutput(String),

    #[error("parameter '{0}' not provided")]
    ParameterNotProvided(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TaskError {
    /// Shorthand for an ad hoc execution failure.
    pub fn msg(message: impl Into<String>) -> Self {
        TaskError::Execution(message.into())
    }
}

/// Failure writing one submission's report files.
#[derive(Debug, Error)]
pub enum ReportWriteError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failure loading a previously written `report.json`.
#[derive(Debug, Error)]
pub enum ReportReadError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Attempted status change that would break monotonicity.
#[derive(Debug, Error)]
#[error("illegal status transition for task '{task}': {from} -> {to}")]
pub struct TransitionError {
    pub task: String,
    pub from: TaskStatus,
    pub to: TaskStatus,
}
