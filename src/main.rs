//! Assessor - batch rubric assessment engine
//!
//! Runs a configurable set of analysis tasks for every submission in a list,
//! scores the results against a weighted rubric and writes one report per
//! submission.
//!
//! Exit codes:
//!   0   - All submissions processed (task failures included)
//!   1   - Setup error (unreadable input, invalid rubric, config or task graph)
//!   2   - At least one submission aborted (setup, report write, crash)
//!   130 - Run cancelled

use anyhow::{Context, Result};
use assessor::cli::{Args, AssessArgs, Command, ExtractArgs};
use assessor::config::{Config, CONFIG_FILE};
use assessor::extract::ResultsExtractor;
use assessor::orchestrator::{BatchSummary, ExecutionPlan, Orchestrator, RunContext};
use assessor::registry::{validate_submission_id, SubmissionRegistry};
use assessor::rubric::Rubric;
use assessor::task::TaskRegistry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const EXIT_OK: i32 = 0;
const EXIT_SETUP: i32 = 1;
const EXIT_ABORTED: i32 = 2;
const EXIT_CANCELLED: i32 = 130;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(EXIT_SETUP);
    }

    // Handle init-config early (no logging needed)
    if let Command::InitConfig { force } = args.command {
        return handle_init_config(force);
    }

    // Load configuration; logging depends on it
    let config = match load_config(&args) {
        Ok((mut config, source)) => {
            config.merge_with_args(&args);
            init_logging(config.log_level(&args))?;
            match source {
                Some(path) => info!("Loaded config from {}", path.display()),
                None => debug!("No config file found, using defaults"),
            }
            config
        }
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            std::process::exit(EXIT_SETUP);
        }
    };

    info!("Assessor v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    let result = match &args.command {
        Command::Assess(assess) => run_assess(&args, assess, config).await,
        Command::Extract(extract) => run_extract(&args, extract, config),
        Command::InitConfig { .. } => Ok(EXIT_OK),
    };

    match result {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(EXIT_SETUP);
        }
    }
}

/// Handle init-config: generate a default .assessor.toml.
fn handle_init_config(force: bool) -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() && !force {
        eprintln!(
            "⚠️  {} already exists. Remove it first, edit it manually, or pass --force.",
            CONFIG_FILE
        );
        std::process::exit(EXIT_SETUP);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to customize tasks, workers, rate limits, and more.");
    Ok(())
}

/// Initialize logging at the given level. `RUST_LOG` wins when set.
fn init_logging(level: tracing::Level) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Assess a batch of submissions. Returns the exit code.
async fn run_assess(args: &Args, assess: &AssessArgs, config: Config) -> Result<i32> {
    let start_time = Instant::now();
    config.validate().context("Invalid configuration")?;

    // Load inputs; any failure here is fatal for the run
    let rubric = load_rubric(&config)?;
    let mut registry = SubmissionRegistry::load(&assess.submissions, &config.submissions.id_column)
        .with_context(|| {
            format!(
                "Failed to load submission list {}",
                assess.submissions.display()
            )
        })?;
    if !assess.only.is_empty() {
        registry = registry.select(&assess.only)?;
    }

    println!(
        "📋 Loaded {} submissions from {}",
        registry.len(),
        assess.submissions.display()
    );
    for row in registry.rejected() {
        eprintln!("⚠️  Skipping {}: {}", row.label(), row.reason);
    }
    println!(
        "📐 Rubric: {} ({} criteria)",
        rubric.name,
        rubric.criteria().count()
    );

    let plan = ExecutionPlan::new(config.tasks.clone(), &TaskRegistry::new(), Arc::new(rubric))
        .context("Invalid task configuration")?;

    let manual = plan.unconfigured_sources();
    if !manual.is_empty() {
        let manual: Vec<_> = manual.into_iter().collect();
        warn!(
            "No task configured for {}; their criteria stay pending",
            manual.join(", ")
        );
    }

    // Handle --dry-run: print the plan and exit
    if assess.dry_run {
        return Ok(handle_dry_run(&plan, &registry));
    }

    println!("🗂️  Output root: {}", config.output_root().display());
    println!(
        "⚙️  Workers: {} | Tasks per submission: {}",
        config.general.workers, config.general.task_parallelism
    );
    println!("\n🔬 Running assessments...\n");

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let ctx = RunContext::new(
        config.output_root(),
        config.orchestrator_settings(!args.quiet),
    )
    .with_limiter(config.rate_limiter())
    .with_cancel(cancel.clone());

    let orchestrator = Orchestrator::new(plan)
        .with_report_options(config.report_options())
        .with_required_parameters(config.submissions.required_parameters.clone());

    let summary = orchestrator
        .run_batch(registry.records(), &ctx)
        .await
        .with_rejected(registry.rejected());

    print_summary(&summary, start_time.elapsed().as_secs_f64());

    if cancel.is_cancelled() {
        eprintln!("\n🛑 Run cancelled. Reports already written remain valid.");
        return Ok(EXIT_CANCELLED);
    }
    if summary.aborted() > 0 {
        eprintln!(
            "\n⛔ {} submission(s) could not be assessed (exit code {}).",
            summary.aborted(),
            EXIT_ABORTED
        );
        return Ok(EXIT_ABORTED);
    }

    println!(
        "\n✅ Assessment complete! Reports saved under: {}",
        config.output_root().display()
    );
    Ok(EXIT_OK)
}

/// Cancel the run on the first Ctrl-C.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            eprintln!("\n🛑 Interrupt received. Finishing in-flight tasks...");
            cancel.cancel();
        }
    });
}

/// Handle --dry-run: print what would run, exit.
fn handle_dry_run(plan: &ExecutionPlan, registry: &SubmissionRegistry) -> i32 {
    println!("\n🔍 Dry run: execution plan (no tasks run)...\n");
    print!("{}", plan.describe());

    println!("\n   Submissions ({}):", registry.len());
    for record in registry.records() {
        println!("     📄 {}", record.id);
    }

    println!("\n✅ Dry run complete. Inputs are valid.");
    EXIT_OK
}

fn print_summary(summary: &BatchSummary, duration: f64) {
    println!("\n📊 Assessment Summary:");
    for submission in &summary.submissions {
        match (&submission.outcome, &submission.total) {
            (outcome, Some(total)) => println!(
                "   {} {}: {} ({})",
                outcome.emoji(),
                submission.submission_id,
                total.display(),
                outcome
            ),
            (outcome, None) => println!(
                "   {} {}: {}",
                outcome.emoji(),
                submission.submission_id,
                outcome
            ),
        }
    }
    println!(
        "   Completed: {} | Aborted: {} | Cancelled: {}",
        summary.completed(),
        summary.aborted(),
        summary.cancelled()
    );
    println!("   Duration: {:.1}s", duration);
}

/// Tabulate written reports. Returns the exit code.
fn run_extract(args: &Args, extract: &ExtractArgs, config: Config) -> Result<i32> {
    let rubric = load_rubric(&config)?;
    let extractor = ResultsExtractor::new(&rubric, config.output_root());

    let ids = if !extract.submission.is_empty() {
        for id in &extract.submission {
            validate_submission_id(id)?;
        }
        extract.submission.clone()
    } else if let Some(ref list) = extract.submissions {
        SubmissionRegistry::load(list, &config.submissions.id_column)
            .with_context(|| format!("Failed to load submission list {}", list.display()))?
            .ids()
    } else {
        extractor.discover()
    };

    if ids.is_empty() {
        warn!(
            "No submissions to tabulate under {}",
            extractor.root().display()
        );
    }

    let extraction = extractor.build_table(&ids, extract.mode);
    for warning in &extraction.warnings {
        eprintln!("⚠️  {}", warning);
    }

    let rendered = extraction.table.render(extract.format);
    match extract.output {
        Some(ref path) => {
            std::fs::write(path, &rendered)
                .with_context(|| format!("Failed to write table to {}", path.display()))?;
            if !args.quiet {
                println!(
                    "✅ Results for {} submissions saved to: {}",
                    ids.len(),
                    path.display()
                );
            }
        }
        None => print!("{}", rendered),
    }

    Ok(EXIT_OK)
}

/// Load configuration from file or use defaults. Also returns the file it
/// came from, if any.
fn load_config(args: &Args) -> Result<(Config, Option<PathBuf>)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        return Ok((Config::load(config_path)?, Some(config_path.clone())));
    }

    // Try default location
    match Config::load_default()? {
        Some(config) => Ok((config, Some(PathBuf::from(CONFIG_FILE)))),
        None => Ok((Config::default(), None)),
    }
}

/// Load the configured rubric, or the built-in one.
fn load_rubric(config: &Config) -> Result<Rubric> {
    match config.rubric_path() {
        Some(path) => {
            info!("Loading rubric from: {}", path.display());
            Rubric::load(&path).with_context(|| format!("Invalid rubric {}", path.display()))
        }
        None => Rubric::builtin().context("Built-in rubric is invalid"),
    }
}
