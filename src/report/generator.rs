//! Report rendering.
//!
//! Renders a [`SubmissionReport`] as Markdown, JSON and a fixed-width
//! plain-text results table, plus the per-submission execution log.
//! Nothing here reads the clock, so identical reports render identically.

use crate::models::{
    CategorySection, CriterionSection, ScoreStatus, SubmissionReport, TaskResult, TaskStatus,
    Total,
};

const SECTION_WIDTH: usize = 45;
const SCORE_WIDTH: usize = 15;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &SubmissionReport, include_summaries: bool) -> String {
    let mut output = String::new();

    // Title
    output.push_str(&format!("# Assessment Report: {}\n\n", report.submission_id));

    output.push_str(&generate_metadata_section(report));
    output.push_str(&generate_summary_section(&report.sections, &report.total));
    output.push_str(&generate_criteria_section(&report.sections, include_summaries));
    output.push_str(&generate_execution_section(&report.task_results));
    output.push_str(&generate_warnings_section(&report.warnings));
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(report: &SubmissionReport) -> String {
    let mut section = String::new();

    let succeeded = report
        .task_results
        .iter()
        .filter(|r| r.status == TaskStatus::Success)
        .count();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Submission:** `{}`\n", report.submission_id));
    section.push_str(&format!("- **Rubric:** {}\n", report.rubric_name));
    section.push_str(&format!(
        "- **Tasks Succeeded:** {}/{}\n",
        succeeded,
        report.task_results.len()
    ));
    section.push_str(&format!("- **Total Score:** {}\n", report.total.display()));
    section.push('\n');

    section
}

/// Generate the score summary table.
fn generate_summary_section(sections: &[CategorySection], total: &Total) -> String {
    let mut section = String::new();

    section.push_str("## Score Summary\n\n");
    section.push_str("| Category | Points | Possible | Pending Review |\n");
    section.push_str("|:---|:---:|:---:|:---:|\n");

    for category in sections {
        let name = if category.bonus {
            format!("{} (bonus)", category.name)
        } else {
            category.name.clone()
        };
        section.push_str(&format!(
            "| {} | {:.2} | {} | {} |\n",
            name,
            category.points,
            format_weight(category.weight),
            category.unscored_count
        ));
    }

    section.push_str(&format!(
        "| **Total** | **{:.2}** | **100** | **{}** |\n\n",
        total.total, total.unscored_count
    ));

    if total.unscored_count > 0 {
        section.push_str(&format!(
            "> ⚠️ {} criteria could not be scored automatically and are pending manual review: {}\n\n",
            total.unscored_count,
            total.unscored.join(", ")
        ));
    }

    section
}

/// Generate one subsection per category.
fn generate_criteria_section(sections: &[CategorySection], include_summaries: bool) -> String {
    let mut section = String::new();

    section.push_str("## Criteria\n\n");

    for category in sections {
        section.push_str(&format!(
            "### {} ({:.2}/{})\n\n",
            category.name,
            category.points,
            format_weight(category.weight)
        ));
        for criterion in &category.criteria {
            section.push_str(&generate_criterion_block(criterion, include_summaries));
        }
    }

    section
}

/// Generate a single criterion block.
fn generate_criterion_block(criterion: &CriterionSection, include_summaries: bool) -> String {
    let mut block = String::new();
    let entry = &criterion.entry;

    block.push_str(&format!("#### {}\n\n", criterion.name));
    block.push_str(&format!(
        "**Source:** `{}.{}`",
        criterion.source_task, criterion.source_field
    ));
    match criterion.task_status {
        Some(status) => block.push_str(&format!(" ({} {})\n\n", status.emoji(), status)),
        None => block.push_str(" (not configured)\n\n"),
    }

    match entry.status {
        ScoreStatus::Scored => {
            block.push_str(&format!(
                "**Points:** {:.2}/{}\n\n",
                entry.points,
                format_weight(criterion.weight)
            ));
            if let (Some(band), Some(percentage)) = (&entry.band, entry.percentage) {
                block.push_str(&format!(
                    "**Performance Level:** {} ({:.1}%)\n\n",
                    band, percentage
                ));
            }
        }
        ScoreStatus::Unscored => {
            block.push_str(&format!(
                "**Points:** pending manual review (out of {})\n\n",
                format_weight(criterion.weight)
            ));
            if let Some(reason) = &entry.reason {
                block.push_str(&format!("**Reason:** {}\n\n", reason));
            }
        }
    }

    if include_summaries {
        if let Some(summary) = &criterion.summary {
            for line in summary.lines() {
                block.push_str(&format!("> {}\n", line));
            }
            block.push('\n');
        }
    }

    block
}

/// Generate the task execution table.
fn generate_execution_section(results: &[TaskResult]) -> String {
    let mut section = String::new();

    section.push_str("## Task Execution\n\n");
    if results.is_empty() {
        section.push_str("No tasks were configured.\n\n");
        return section;
    }

    section.push_str("| Task | Status | Attempts | Duration | Diagnostic |\n");
    section.push_str("|:---|:---|:---:|---:|:---|\n");
    for result in results {
        section.push_str(&format!(
            "| `{}` | {} {} | {} | {} | {} |\n",
            result.task,
            result.status.emoji(),
            result.status,
            result.attempts,
            format_duration_ms(result.duration_ms),
            result
                .diagnostic
                .as_deref()
                .map(escape_cell)
                .unwrap_or_default()
        ));
    }
    section.push('\n');

    section
}

/// Generate the warnings section.
fn generate_warnings_section(warnings: &[String]) -> String {
    if warnings.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Warnings\n\n");
    for warning in warnings {
        section.push_str(&format!("- {}\n", warning));
    }
    section.push('\n');

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str("*Report generated by assessor*\n");

    footer
}

/// Generate a JSON report.
pub fn generate_json_report(report: &SubmissionReport) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

/// Fixed-width results table with a final `Total Score:` line.
pub fn generate_results_text(report: &SubmissionReport) -> String {
    let section_width = report
        .sections
        .iter()
        .flat_map(|s| s.criteria.iter().map(|c| c.name.chars().count() + 4))
        .chain(report.sections.iter().map(|s| s.name.chars().count()))
        .max()
        .unwrap_or(0)
        .max(SECTION_WIDTH);

    let mut table = format!("Assessment Results for {}\n", report.submission_id);
    table.push_str(&"=".repeat(section_width + SCORE_WIDTH + 3));
    table.push_str("\n\n");

    table.push_str(&format!(
        "{:<w$} | {}\n",
        "Rubric Section",
        "Score",
        w = section_width
    ));
    table.push_str(&format!(
        "{}-+-{}\n",
        "-".repeat(section_width),
        "-".repeat(SCORE_WIDTH)
    ));

    for category in &report.sections {
        let name = if category.bonus {
            format!("{} (bonus)", category.name)
        } else {
            category.name.clone()
        };
        table.push_str(&format!("{}\n", name));

        for criterion in &category.criteria {
            let score = match criterion.entry.status {
                ScoreStatus::Scored => format!(
                    "{:.2}/{}",
                    criterion.entry.points,
                    format_weight(criterion.weight)
                ),
                ScoreStatus::Unscored => "pending".to_string(),
            };
            table.push_str(&format!(
                "  - {:<w$} | {}\n",
                criterion.name,
                score,
                w = section_width - 4
            ));
        }
    }

    table.push('\n');
    table.push_str(&format!("Total Score: {}\n", report.total.display()));

    table
}

/// One line per task plus any setup errors.
pub fn generate_execution_log(
    submission_id: &str,
    results: &[TaskResult],
    setup_errors: &[String],
) -> String {
    let mut log = format!("Execution log for {}\n\n", submission_id);

    for error in setup_errors {
        log.push_str(&format!("[SETUP] {}\n", error));
    }

    for result in results {
        let started = result
            .started_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "-".to_string());
        log.push_str(&format!(
            "[{}] {} attempts={} duration={} started={}",
            result.status,
            result.task,
            result.attempts,
            format_duration_ms(result.duration_ms),
            started
        ));
        if let Some(diagnostic) = &result.diagnostic {
            log.push_str(&format!(" :: {}", diagnostic));
        }
        log.push('\n');
    }

    log
}

/// `15` for whole weights, `2.5` otherwise.
pub(crate) fn format_weight(weight: f64) -> String {
    if weight.fract() == 0.0 {
        format!("{:.0}", weight)
    } else {
        format!("{}", weight)
    }
}

fn format_duration_ms(ms: u64) -> String {
    if ms >= 1000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}ms", ms)
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}
