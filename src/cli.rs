//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::extract::{TableFormat, TableMode};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Assessor - batch rubric assessment for student submissions
///
/// Runs every configured analysis for each submission, maps the results onto
/// a weighted rubric and writes one report per submission.
///
/// Examples:
///   assessor assess --submissions students.csv
///   assessor assess --submissions students.csv --only alice --dry-run
///   assessor extract --mode simplified --format ascii
///   assessor init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file
    ///
    /// If not specified, looks for .assessor.toml in the current directory
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Assess every submission in a submission list
    Assess(AssessArgs),

    /// Tabulate written reports side by side
    Extract(ExtractArgs),

    /// Generate a default .assessor.toml configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct AssessArgs {
    /// CSV submission list with a header row
    #[arg(short, long, value_name = "CSV")]
    pub submissions: PathBuf,

    /// Only assess these submission ids (repeatable)
    #[arg(long, value_name = "ID")]
    pub only: Vec<String>,

    /// Directory receiving the per-submission reports
    #[arg(short, long, value_name = "DIR")]
    pub output_root: Option<PathBuf>,

    /// Rubric definition (TOML); the built-in rubric is used otherwise
    #[arg(short, long, value_name = "FILE", env = "ASSESSOR_RUBRIC")]
    pub rubric: Option<PathBuf>,

    /// Number of submissions assessed concurrently
    #[arg(long, value_name = "NUM")]
    pub workers: Option<usize>,

    /// Number of tasks run concurrently within one submission
    #[arg(long, value_name = "NUM")]
    pub task_parallelism: Option<usize>,

    /// Dry run: validate inputs and print the execution plan
    #[arg(long)]
    pub dry_run: bool,
}

/// Without `--submission` or `--submissions`, every submission directory
/// under the root that holds a report is tabulated.
#[derive(clap::Args, Debug, Clone)]
pub struct ExtractArgs {
    /// Only these submission ids (repeatable)
    #[arg(long, value_name = "ID", conflicts_with = "submissions")]
    pub submission: Vec<String>,

    /// Take the roster from a submission list
    #[arg(long, value_name = "CSV")]
    pub submissions: Option<PathBuf>,

    /// Directory holding the per-submission reports
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Table granularity (detailed, simplified)
    #[arg(long, default_value = "detailed", value_name = "MODE")]
    pub mode: TableMode,

    /// Table format (markdown, ascii)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: TableFormat,

    /// Rubric definition (TOML); must match the one used to assess
    #[arg(short, long, value_name = "FILE", env = "ASSESSOR_RUBRIC")]
    pub rubric: Option<PathBuf>,

    /// Write the table here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        match &self.command {
            Command::Assess(assess) => {
                if assess.workers == Some(0) {
                    return Err("Workers must be at least 1".to_string());
                }
                if assess.task_parallelism == Some(0) {
                    return Err("Task parallelism must be at least 1".to_string());
                }
                if !assess.submissions.is_file() {
                    return Err(format!(
                        "Submission list does not exist: {}",
                        assess.submissions.display()
                    ));
                }
            }
            Command::Extract(extract) => {
                if let Some(ref list) = extract.submissions {
                    if !list.is_file() {
                        return Err(format!(
                            "Submission list does not exist: {}",
                            list.display()
                        ));
                    }
                }
            }
            Command::InitConfig { .. } => {}
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("assessor").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn test_parse_assess() {
        let args = parse(&[
            "assess",
            "-s",
            "list.csv",
            "--only",
            "a",
            "--only",
            "b",
            "--dry-run",
        ]);
        let Command::Assess(assess) = args.command else {
            panic!("expected assess");
        };
        assert_eq!(assess.submissions, PathBuf::from("list.csv"));
        assert_eq!(assess.only, vec!["a", "b"]);
        assert!(assess.dry_run);
        assert!(assess.workers.is_none());
    }

    #[test]
    fn test_parse_extract_defaults() {
        let args = parse(&["extract"]);
        let Command::Extract(extract) = args.command else {
            panic!("expected extract");
        };
        assert!(extract.submission.is_empty());
        assert!(extract.submissions.is_none());
        assert_eq!(extract.mode, TableMode::Detailed);
        assert_eq!(extract.format, TableFormat::Markdown);

        let args = parse(&["extract", "--mode", "simplified", "--format", "ascii"]);
        let Command::Extract(extract) = args.command else {
            panic!("expected extract");
        };
        assert_eq!(extract.mode, TableMode::Simplified);
        assert_eq!(extract.format, TableFormat::Ascii);
    }

    #[test]
    fn test_extract_selection_conflicts() {
        let result = Args::try_parse_from([
            "assessor",
            "extract",
            "--submission",
            "x",
            "--submissions",
            "list.csv",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = parse(&["init-config"]);
        assert!(args.validate().is_ok());
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_workers_and_missing_list() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("list.csv");
        std::fs::write(&list, "id\na\n").unwrap();
        let list = list.to_str().unwrap();

        assert!(parse(&["assess", "-s", list]).validate().is_ok());
        assert!(parse(&["assess", "-s", list, "--workers", "0"])
            .validate()
            .is_err());
        assert!(parse(&["assess", "-s", "missing.csv"]).validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = parse(&["init-config"]);
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
