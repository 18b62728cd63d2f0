//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.assessor.toml` files.

use crate::cli::{Args, Command};
use crate::orchestrator::OrchestratorSettings;
use crate::report::ReportOptions;
use crate::task::{AnalysisTaskSpec, CommandSpec, RateLimiter};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".assessor.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Submission list settings.
    #[serde(default)]
    pub submissions: SubmissionsConfig,

    /// Shared rate limiter settings.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,

    /// Analysis tasks, in configuration order.
    #[serde(default = "default_tasks")]
    pub tasks: Vec<AnalysisTaskSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            submissions: SubmissionsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            report: ReportConfig::default(),
            tasks: default_tasks(),
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory receiving one subdirectory per submission.
    #[serde(default = "default_output_root")]
    pub output_root: String,

    /// Rubric file; the built-in rubric is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rubric: Option<String>,

    /// Number of submissions assessed concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Number of tasks run concurrently within one submission.
    #[serde(default = "default_task_parallelism")]
    pub task_parallelism: usize,

    /// Seconds in-flight tasks may keep running after a cancel.
    #[serde(default = "default_grace_period")]
    pub grace_period_seconds: u64,

    /// Seconds to wait before retrying a transient task.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_seconds: u64,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output_root: default_output_root(),
            rubric: None,
            workers: default_workers(),
            task_parallelism: default_task_parallelism(),
            grace_period_seconds: default_grace_period(),
            retry_backoff_seconds: default_retry_backoff(),
            verbose: false,
        }
    }
}

fn default_output_root() -> String {
    "assessment_reports".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_task_parallelism() -> usize {
    3
}

fn default_grace_period() -> u64 {
    10
}

fn default_retry_backoff() -> u64 {
    5
}

/// Submission list settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionsConfig {
    /// Column holding the submission id.
    #[serde(default = "default_id_column")]
    pub id_column: String,

    /// Parameters every submission must provide; otherwise it is not assessed.
    #[serde(default)]
    pub required_parameters: Vec<String>,
}

impl Default for SubmissionsConfig {
    fn default() -> Self {
        Self {
            id_column: default_id_column(),
            required_parameters: Vec::new(),
        }
    }
}

fn default_id_column() -> String {
    "student".to_string()
}

/// Limits for tasks flagged `rate_limited`, shared across all submissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum concurrent holders.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Minimum spacing between two acquisitions.
    #[serde(default = "default_min_interval")]
    pub min_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            min_interval_ms: default_min_interval(),
        }
    }
}

fn default_max_concurrent() -> usize {
    2
}

fn default_min_interval() -> u64 {
    1000
}

/// Report generation settings. `report.json` is always written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Write `report.md`.
    #[serde(default = "default_true")]
    pub write_markdown: bool,

    /// Write `results.txt`.
    #[serde(default = "default_true")]
    pub write_results: bool,

    /// Quote task summaries in the Markdown report.
    #[serde(default = "default_true")]
    pub include_summaries: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            write_markdown: true,
            write_results: true,
            include_summaries: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn analyzer(script: &str, args: &[&str]) -> CommandSpec {
    let mut full = vec![format!("analyzers/{}", script)];
    full.extend(args.iter().map(|a| a.to_string()));
    full.extend(["--out".to_string(), "{output_dir}".to_string()]);
    CommandSpec {
        program: "python3".to_string(),
        args: full,
        result_file: "result.json".to_string(),
        env: BTreeMap::new(),
    }
}

fn analyzer_task(name: &str, command: CommandSpec) -> AnalysisTaskSpec {
    AnalysisTaskSpec {
        command: Some(command),
        ..AnalysisTaskSpec::new(name)
    }
}

/// The web-project pipeline: fetch the repository, then run one analyzer
/// per rubric area against the checkout or the deployed site.
fn default_tasks() -> Vec<AnalysisTaskSpec> {
    let site = "{submission_dir}/site";
    let after_fetch = vec!["fetch_repo".to_string()];

    vec![
        AnalysisTaskSpec {
            transient: true,
            rate_limited: true,
            ..analyzer_task(
                "fetch_repo",
                analyzer("fetch_repo.py", &["--repo", "{github}", "--dest", site]),
            )
        },
        AnalysisTaskSpec {
            depends_on: after_fetch.clone(),
            ..analyzer_task("code_quality", analyzer("code_quality.py", &["--site", site]))
        },
        AnalysisTaskSpec {
            depends_on: after_fetch.clone(),
            ..analyzer_task("accessibility", analyzer("accessibility.py", &["--site", site]))
        },
        AnalysisTaskSpec {
            depends_on: after_fetch.clone(),
            ..analyzer_task("responsive", analyzer("responsive.py", &["--site", site]))
        },
        AnalysisTaskSpec {
            depends_on: after_fetch,
            ..analyzer_task("git_history", analyzer("git_history.py", &["--repo-dir", site]))
        },
        AnalysisTaskSpec {
            transient: true,
            rate_limited: true,
            ..analyzer_task(
                "deployment",
                analyzer("deployment.py", &["--repo", "{github}", "--url", "{netlify}"]),
            )
        },
        AnalysisTaskSpec {
            timeout_seconds: 600,
            transient: true,
            rate_limited: true,
            ..analyzer_task("performance", analyzer("performance.py", &["--url", "{netlify}"]))
        },
        AnalysisTaskSpec {
            rate_limited: true,
            ..analyzer_task(
                "conversation",
                analyzer("conversation.py", &["--links", "{conversations}"]),
            )
        },
    ]
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were given explicitly.
    pub fn merge_with_args(&mut self, args: &Args) {
        if args.verbose {
            self.general.verbose = true;
        }

        match &args.command {
            Command::Assess(assess) => {
                if let Some(ref root) = assess.output_root {
                    self.general.output_root = root.display().to_string();
                }
                if let Some(ref rubric) = assess.rubric {
                    self.general.rubric = Some(rubric.display().to_string());
                }
                if let Some(workers) = assess.workers {
                    self.general.workers = workers;
                }
                if let Some(parallelism) = assess.task_parallelism {
                    self.general.task_parallelism = parallelism;
                }
            }
            Command::Extract(extract) => {
                if let Some(ref root) = extract.root {
                    self.general.output_root = root.display().to_string();
                }
                if let Some(ref rubric) = extract.rubric {
                    self.general.rubric = Some(rubric.display().to_string());
                }
            }
            Command::InitConfig { .. } => {}
        }
    }

    /// Reject settings no run could work with.
    pub fn validate(&self) -> Result<()> {
        if self.general.workers == 0 {
            bail!("general.workers must be at least 1");
        }
        if self.general.task_parallelism == 0 {
            bail!("general.task_parallelism must be at least 1");
        }
        if self.rate_limit.max_concurrent == 0 {
            bail!("rate_limit.max_concurrent must be at least 1");
        }
        if self.submissions.id_column.trim().is_empty() {
            bail!("submissions.id_column must not be empty");
        }
        for spec in &self.tasks {
            if spec.timeout_seconds == 0 {
                bail!("task '{}': timeout_seconds must be at least 1", spec.name);
            }
        }
        Ok(())
    }

    pub fn output_root(&self) -> PathBuf {
        PathBuf::from(&self.general.output_root)
    }

    /// Log level from the CLI flags, raised to debug when the config asks for
    /// verbose output. `--quiet` still wins.
    pub fn log_level(&self, args: &Args) -> tracing::Level {
        match args.log_level() {
            tracing::Level::INFO if self.general.verbose => tracing::Level::DEBUG,
            level => level,
        }
    }

    pub fn rubric_path(&self) -> Option<PathBuf> {
        self.general.rubric.as_ref().map(PathBuf::from)
    }

    pub fn orchestrator_settings(&self, show_progress: bool) -> OrchestratorSettings {
        OrchestratorSettings {
            workers: self.general.workers,
            task_parallelism: self.general.task_parallelism,
            grace_period: Duration::from_secs(self.general.grace_period_seconds),
            retry_backoff: Duration::from_secs(self.general.retry_backoff_seconds),
            show_progress,
        }
    }

    pub fn report_options(&self) -> ReportOptions {
        ReportOptions {
            write_markdown: self.report.write_markdown,
            write_results: self.report.write_results,
            include_summaries: self.report.include_summaries,
        }
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(
            self.rate_limit.max_concurrent,
            Duration::from_millis(self.rate_limit.min_interval_ms),
        )
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
