//! Per-submission reports.
//!
//! [`aggregator`] assembles the report, [`generator`] renders it and
//! [`layout`] decides where everything lands on disk.

pub mod aggregator;
pub mod generator;
pub mod layout;

pub use aggregator::ReportAggregator;
pub use generator::{
    generate_execution_log, generate_json_report, generate_markdown_report,
    generate_results_text,
};
pub use layout::{read_report, write_execution_log, write_report, SubmissionLayout};

/// Which renderings to write next to `report.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportOptions {
    pub write_markdown: bool,
    pub write_results: bool,
    /// Quote task summaries in the Markdown report.
    pub include_summaries: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            write_markdown: true,
            write_results: true,
            include_summaries: true,
        }
    }
}
