//! On-disk layout of one submission's outputs.
//!
//! ```text
//! <root>/<id>/
//!   tasks/<task>/        task artifacts
//!   report.md
//!   report.json          read back by the extractor
//!   results.txt
//!   execution_log.txt
//! ```

use super::generator::{generate_json_report, generate_markdown_report, generate_results_text};
use super::ReportOptions;
use crate::error::{ReportReadError, ReportWriteError, SetupError};
use crate::models::SubmissionReport;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const REPORT_JSON: &str = "report.json";
pub const REPORT_MARKDOWN: &str = "report.md";
pub const RESULTS_TEXT: &str = "results.txt";
pub const EXECUTION_LOG: &str = "execution_log.txt";

/// Paths for one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionLayout {
    dir: PathBuf,
}

impl SubmissionLayout {
    pub fn new(output_root: &Path, submission_id: &str) -> Self {
        Self {
            dir: output_root.join(submission_id),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.dir.join("tasks")
    }

    pub fn task_dir(&self, task: &str) -> PathBuf {
        self.tasks_dir().join(task)
    }

    pub fn report_json(&self) -> PathBuf {
        self.dir.join(REPORT_JSON)
    }

    pub fn report_markdown(&self) -> PathBuf {
        self.dir.join(REPORT_MARKDOWN)
    }

    pub fn results_text(&self) -> PathBuf {
        self.dir.join(RESULTS_TEXT)
    }

    pub fn execution_log(&self) -> PathBuf {
        self.dir.join(EXECUTION_LOG)
    }

    /// Create the submission and task directories.
    pub fn create(&self) -> Result<(), SetupError> {
        let tasks = self.tasks_dir();
        std::fs::create_dir_all(&tasks).map_err(|source| SetupError::OutputDir {
            path: tasks.clone(),
            source,
        })
    }

    /// Remove report files left by an earlier run.
    pub fn clear_report(&self) -> Result<(), ReportWriteError> {
        for path in [self.report_json(), self.report_markdown(), self.results_text()] {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed stale report file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(ReportWriteError::Io { path, source }),
            }
        }
        Ok(())
    }
}

/// Write the enabled renderings, then `report.json`. Returns the written paths.
///
/// `report.json` goes last, so a failed write leaves no readable report.
pub fn write_report(
    layout: &SubmissionLayout,
    report: &SubmissionReport,
    options: &ReportOptions,
) -> Result<Vec<PathBuf>, ReportWriteError> {
    let json = generate_json_report(report)?;
    let mut written = Vec::new();

    if options.write_markdown {
        let markdown = generate_markdown_report(report, options.include_summaries);
        written.push(write_file(&layout.report_markdown(), &markdown)?);
    }

    if options.write_results {
        let results = generate_results_text(report);
        written.push(write_file(&layout.results_text(), &results)?);
    }

    written.push(write_file(&layout.report_json(), &json)?);

    debug!(submission = %report.submission_id, files = written.len(), "report written");
    Ok(written)
}

pub fn write_execution_log(
    layout: &SubmissionLayout,
    content: &str,
) -> Result<PathBuf, ReportWriteError> {
    write_file(&layout.execution_log(), content)
}

/// Load a `report.json`.
pub fn read_report(path: &Path) -> Result<SubmissionReport, ReportReadError> {
    let content = std::fs::read_to_string(path).map_err(|source| ReportReadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ReportReadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Write through a temporary file and rename, so a reader never sees a
/// half-written file.
fn write_file(path: &Path, content: &str) -> Result<PathBuf, ReportWriteError> {
    let io_err = |source| ReportWriteError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;
    Ok(path.to_path_buf())
}
