//! Cross-submission results extraction.
//!
//! Reads the `report.json` written for each submission and lays the scores
//! out side by side, one row per submission.

pub mod table;

pub use table::{ResultsRow, ResultsTable};

use crate::models::SubmissionReport;
use crate::report::layout::REPORT_JSON;
use crate::report::{read_report, SubmissionLayout};
use crate::rubric::{round2, Rubric};
use clap::ValueEnum;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Column granularity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum TableMode {
    /// One column per criterion.
    #[default]
    Detailed,
    /// One column per category.
    Simplified,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum TableFormat {
    #[default]
    Markdown,
    Ascii,
}

/// A built table plus anything worth telling the user about.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub table: ResultsTable,
    pub warnings: Vec<String>,
}

enum LoadedReport {
    Found(SubmissionReport),
    Missing,
    Unreadable,
}

/// Builds comparison tables from written reports.
pub struct ResultsExtractor<'a> {
    rubric: &'a Rubric,
    root: PathBuf,
}

impl<'a> ResultsExtractor<'a> {
    pub fn new(rubric: &'a Rubric, root: impl Into<PathBuf>) -> Self {
        Self {
            rubric,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ids of every directory directly under the root holding a `report.json`,
    /// sorted by name.
    pub fn discover(&self) -> Vec<String> {
        if !self.root.is_dir() {
            warn!(root = %self.root.display(), "results root does not exist");
            return Vec::new();
        }

        WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_dir() && entry.path().join(REPORT_JSON).is_file())
            .filter_map(|entry| entry.file_name().to_str().map(String::from))
            .collect()
    }

    /// Build the table for the given submissions, in the given order.
    pub fn build_table(&self, submission_ids: &[String], mode: TableMode) -> Extraction {
        let columns: Vec<String> = match mode {
            TableMode::Detailed => self
                .rubric
                .criteria()
                .map(|(_, criterion)| criterion.id.clone())
                .collect(),
            TableMode::Simplified => self
                .rubric
                .categories
                .iter()
                .map(|category| category.name.clone())
                .collect(),
        };

        let mut warnings = Vec::new();
        let rows = submission_ids
            .iter()
            .map(|id| match self.load(id, &mut warnings) {
                LoadedReport::Found(report) => self.row(&report, mode),
                LoadedReport::Missing => ResultsRow::not_available(id, columns.len(), "no report"),
                LoadedReport::Unreadable => {
                    ResultsRow::not_available(id, columns.len(), "unreadable report")
                }
            })
            .collect();

        debug!(rows = submission_ids.len(), ?mode, "results table built");

        Extraction {
            table: ResultsTable {
                title: format!("Assessment Results: {}", self.rubric.name),
                columns,
                rows,
            },
            warnings,
        }
    }

    fn load(&self, submission_id: &str, warnings: &mut Vec<String>) -> LoadedReport {
        let path = SubmissionLayout::new(&self.root, submission_id).report_json();
        if !path.is_file() {
            return LoadedReport::Missing;
        }

        match read_report(&path) {
            Ok(report) => LoadedReport::Found(report),
            Err(e) => {
                warn!(submission = submission_id, "{}", e);
                warnings.push(format!("{}: {}", submission_id, e));
                LoadedReport::Unreadable
            }
        }
    }

    fn row(&self, report: &SubmissionReport, mode: TableMode) -> ResultsRow {
        let values = match mode {
            TableMode::Detailed => self
                .rubric
                .criteria()
                .map(|(_, criterion)| match report.entry(&criterion.id) {
                    Some(entry) if entry.is_scored() => format!("{:.2}", entry.points),
                    Some(_) => "pending".to_string(),
                    None => "N/A".to_string(),
                })
                .collect(),
            TableMode::Simplified => self
                .rubric
                .categories
                .iter()
                .map(|category| {
                    let sum: f64 = report
                        .score_entries
                        .iter()
                        .filter(|e| e.category_id == category.id && e.is_scored())
                        .map(|e| e.points)
                        .sum();
                    format!("{:.2}", round2(sum))
                })
                .collect(),
        };

        let notes = match report.total.unscored_count {
            0 => String::new(),
            n => format!("{} unscored", n),
        };

        ResultsRow {
            submission_id: report.submission_id.clone(),
            values,
            total: format!("{:.2}", report.total.total),
            notes,
        }
    }
}
