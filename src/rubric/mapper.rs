//! Converts task results into per-criterion score entries.

use super::{round2, Band, Category, Criterion, Rubric};
use crate::models::{ScoreEntry, ScoreStatus, TaskOutput, TaskResult, TaskStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// A criterion that could not be scored automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingWarning {
    pub criterion_id: String,
    pub reason: String,
}

impl fmt::Display for MappingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.criterion_id, self.reason)
    }
}

/// Result of mapping one submission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mapping {
    /// One entry per criterion, in rubric order.
    pub entries: Vec<ScoreEntry>,
    /// One warning per Unscored entry.
    pub warnings: Vec<MappingWarning>,
}

/// Maps task results onto a rubric.
#[derive(Debug, Clone, Copy)]
pub struct RubricMapper<'a> {
    rubric: &'a Rubric,
}

impl<'a> RubricMapper<'a> {
    pub fn new(rubric: &'a Rubric) -> Self {
        Self { rubric }
    }

    /// Score every criterion. A criterion is Scored exactly when its source
    /// task succeeded; anything else is Unscored with the reason attached.
    pub fn map(&self, results: &[TaskResult]) -> Mapping {
        let by_task: HashMap<&str, &TaskResult> =
            results.iter().map(|r| (r.task.as_str(), r)).collect();

        let mut mapping = Mapping::default();
        for (category, criterion) in self.rubric.criteria() {
            let result = by_task.get(criterion.source.task.as_str()).copied();
            let entry = map_criterion(category, criterion, result);
            if let Some(reason) = &entry.reason {
                warn!(criterion = %criterion.id, "unscored: {}", reason);
                mapping.warnings.push(MappingWarning {
                    criterion_id: criterion.id.clone(),
                    reason: reason.clone(),
                });
            }
            mapping.entries.push(entry);
        }

        debug!(
            entries = mapping.entries.len(),
            unscored = mapping.warnings.len(),
            "mapped task results"
        );
        mapping
    }

    /// Check that a successful output of `task` can be read by every
    /// criterion sourced from it.
    pub fn check_output(&self, task: &str, output: &TaskOutput) -> Result<(), String> {
        for (_, criterion) in self.rubric.criteria() {
            if criterion.source.task != task {
                continue;
            }
            let field = &criterion.source.field;
            let value = output
                .field(field)
                .ok_or_else(|| format!("output missing field '{}'", field))?;
            to_percentage(&criterion.bands, value)
                .map_err(|e| format!("field '{}': {}", field, e))?;
        }
        Ok(())
    }
}

fn map_criterion(
    category: &Category,
    criterion: &Criterion,
    result: Option<&TaskResult>,
) -> ScoreEntry {
    let task = &criterion.source.task;
    let unscored = |reason: String| ScoreEntry {
        criterion_id: criterion.id.clone(),
        category_id: category.id.clone(),
        status: ScoreStatus::Unscored,
        percentage: None,
        band: None,
        points: 0.0,
        max_points: criterion.weight,
        bonus: category.bonus,
        reason: Some(reason),
    };

    let result = match result {
        Some(result) => result,
        None => return unscored(format!("{} is not configured", task)),
    };

    let diagnostic = result.diagnostic.as_deref().unwrap_or("no diagnostic");
    let output = match (result.status, &result.output) {
        (TaskStatus::Success, Some(output)) => output,
        (TaskStatus::Success, None) => return unscored(format!("{} produced no output", task)),
        (TaskStatus::TimedOut, _) => return unscored(format!("{} timed out: {}", task, diagnostic)),
        (TaskStatus::Failed, _) => return unscored(format!("{} failed: {}", task, diagnostic)),
        (TaskStatus::Skipped, _) => return unscored(format!("{} skipped: {}", task, diagnostic)),
        (TaskStatus::Pending | TaskStatus::Running, _) => {
            return unscored(format!("{} did not finish", task))
        }
    };

    let percentage = match output.field(&criterion.source.field) {
        Some(value) => match to_percentage(&criterion.bands, value) {
            Ok(p) => p,
            Err(e) => {
                return unscored(format!(
                    "{} field '{}': {}",
                    task, criterion.source.field, e
                ))
            }
        },
        None => {
            return unscored(format!(
                "{} output missing field '{}'",
                task, criterion.source.field
            ))
        }
    };

    match interpolate(&criterion.bands, percentage) {
        Some((band, points)) => ScoreEntry {
            criterion_id: criterion.id.clone(),
            category_id: category.id.clone(),
            status: ScoreStatus::Scored,
            percentage: Some(percentage),
            band: Some(band.label.clone()),
            points,
            max_points: criterion.weight,
            bonus: category.bonus,
            reason: None,
        },
        None => unscored(format!("criterion '{}' has no bands", criterion.id)),
    }
}

/// A number is a percentage; a string is a band label and maps to the band
/// midpoint. Result is clamped into [0, 100].
fn to_percentage(bands: &[Band], value: &Value) -> Result<f64, String> {
    let raw = match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| format!("unrepresentable number {}", n))?,
        Value::String(label) => {
            let label = label.trim();
            bands
                .iter()
                .find(|b| b.label.eq_ignore_ascii_case(label))
                .map(Band::midpoint)
                .ok_or_else(|| format!("unknown band label '{}'", label))?
        }
        other => return Err(format!("expected a number or band label, got {}", other)),
    };
    Ok(raw.clamp(0.0, 100.0))
}

/// Linear interpolation of a percentage into points.
///
/// Picks the highest band whose lower bound is at or below the percentage,
/// so values falling between two bands take the lower band's top score.
/// Returns the chosen band and the points rounded to two decimals.
pub fn interpolate(bands: &[Band], percentage: f64) -> Option<(&Band, f64)> {
    let p = percentage.clamp(0.0, 100.0);
    let band = bands
        .iter()
        .rev()
        .find(|b| b.percent[0] <= p)
        .or_else(|| bands.first())?;

    let [lo, hi] = band.percent;
    let t = if hi > lo {
        ((p - lo) / (hi - lo)).clamp(0.0, 1.0)
    } else {
        1.0
    };
    let points = band.points[0] + t * (band.points[1] - band.points[0]);
    Some((band, round2(points)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rubric::standard_bands;
    use chrono::Utc;
    use proptest::prelude::*;

    fn succeeded(task: &str, output: TaskOutput) -> TaskResult {
        let now = Utc::now();
        let mut result = TaskResult::pending("s1", task);
        result.start(now).unwrap();
        result.succeed(output, now).unwrap();
        result
    }

    fn finished_with(task: &str, status: TaskStatus, diagnostic: &str) -> TaskResult {
        let now = Utc::now();
        let mut result = TaskResult::pending("s1", task);
        match status {
            TaskStatus::Skipped => result.skip(diagnostic).unwrap(),
            TaskStatus::Failed => {
                result.start(now).unwrap();
                result.fail(diagnostic, now).unwrap();
            }
            TaskStatus::TimedOut => {
                result.start(now).unwrap();
                result.time_out(diagnostic, now).unwrap();
            }
            TaskStatus::Running => result.start(now).unwrap(),
            TaskStatus::Pending | TaskStatus::Success => {}
        }
        result
    }

    /// Every automated task succeeds with every field at `percent`.
    fn all_tasks_at(rubric: &Rubric, percent: f64) -> Vec<TaskResult> {
        rubric
            .required_fields()
            .into_iter()
            .map(|(task, fields)| {
                let output = fields
                    .into_iter()
                    .fold(TaskOutput::default(), |out, f| out.with_field(f, percent));
                succeeded(&task, output)
            })
            .collect()
    }

    #[test]
    fn test_interpolate_band_edges() {
        let bands = standard_bands(10.0);
        assert_eq!(interpolate(&bands, 0.0).map(|(_, p)| p), Some(0.0));
        assert_eq!(interpolate(&bands, 49.0).map(|(_, p)| p), Some(4.99));
        assert_eq!(interpolate(&bands, 49.5).map(|(_, p)| p), Some(4.99));
        assert_eq!(interpolate(&bands, 50.0).map(|(_, p)| p), Some(5.0));
        assert_eq!(interpolate(&bands, 100.0).map(|(_, p)| p), Some(10.0));
        assert_eq!(interpolate(&bands, 150.0).map(|(_, p)| p), Some(10.0));

        let (band, points) = interpolate(&bands, 87.5).unwrap();
        assert_eq!(band.label, "Distinction");
        assert_eq!(points, 8.75);
    }

    #[test]
    fn test_scenario_lower_bounds_give_lower_points() {
        let rubric = Rubric::builtin().unwrap();
        let mapper = RubricMapper::new(&rubric);

        for band_idx in 0..4 {
            let lower = standard_bands(1.0)[band_idx].percent[0];
            let results = all_tasks_at(&rubric, lower);
            let mapping = mapper.map(&results);
            assert!(mapping.warnings.is_empty());
            for (entry, (_, criterion)) in mapping.entries.iter().zip(rubric.criteria()) {
                assert!(entry.is_scored());
                assert_eq!(entry.points, criterion.bands[band_idx].points[0]);
            }
        }
    }

    #[test]
    fn test_timed_out_task_is_unscored_with_reason() {
        let rubric = Rubric::builtin().unwrap();
        let mut results = all_tasks_at(&rubric, 80.0);
        results.retain(|r| r.task != "performance");
        results.push(finished_with(
            "performance",
            TaskStatus::TimedOut,
            "exceeded 600s",
        ));

        let mapping = RubricMapper::new(&rubric).map(&results);
        let perf = mapping
            .entries
            .iter()
            .find(|e| e.criterion_id == "site_performance")
            .unwrap();
        assert_eq!(perf.status, ScoreStatus::Unscored);
        assert_eq!(perf.points, 0.0);
        assert_eq!(
            perf.reason.as_deref(),
            Some("performance timed out: exceeded 600s")
        );
        assert!(mapping
            .warnings
            .iter()
            .any(|w| w.criterion_id == "site_performance"));
    }

    #[test]
    fn test_skipped_deployment_is_unscored_not_zero() {
        let rubric = Rubric::builtin().unwrap();
        let mut results = all_tasks_at(&rubric, 70.0);
        results.retain(|r| r.task != "deployment");
        results.push(finished_with(
            "deployment",
            TaskStatus::Skipped,
            "parameter 'deploy_url' not provided",
        ));

        let mapping = RubricMapper::new(&rubric).map(&results);
        let deploy = mapping
            .entries
            .iter()
            .find(|e| e.criterion_id == "deployment")
            .unwrap();
        assert!(!deploy.is_scored());
        assert!(deploy.reason.as_deref().unwrap().contains("not provided"));
    }

    #[test]
    fn test_band_label_maps_to_midpoint() {
        let rubric = Rubric::builtin().unwrap();
        let output = TaskOutput::default()
            .with_field("responsive_percent", 80)
            .with_field("layout_level", "credit");
        let mapping = RubricMapper::new(&rubric).map(&[succeeded("responsive", output)]);
        let layout = mapping
            .entries
            .iter()
            .find(|e| e.criterion_id == "flexbox_grid")
            .unwrap();
        assert_eq!(layout.percentage, Some(69.5));
        assert_eq!(layout.band.as_deref(), Some("Credit"));
    }

    #[test]
    fn test_check_output_rejects_missing_or_bad_fields() {
        let rubric = Rubric::builtin().unwrap();
        let mapper = RubricMapper::new(&rubric);

        let partial = TaskOutput::default().with_field("responsive_percent", 60);
        assert_eq!(
            mapper.check_output("responsive", &partial),
            Err("output missing field 'layout_level'".to_string())
        );

        let bad_label = partial.clone().with_field("layout_level", "excellent");
        assert!(mapper.check_output("responsive", &bad_label).is_err());

        let good = partial.with_field("layout_level", "Pass");
        assert!(mapper.check_output("responsive", &good).is_ok());
        assert!(mapper.check_output("unrelated", &TaskOutput::default()).is_ok());
    }

    const STATUSES: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Success,
        TaskStatus::Failed,
        TaskStatus::Skipped,
        TaskStatus::TimedOut,
    ];

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_scored_iff_source_succeeded(
            picks in proptest::collection::vec(0usize..7, 9),
            percent in 0.0f64..=100.0,
        ) {
            let rubric = Rubric::builtin().unwrap();
            let fields = rubric.required_fields();
            let mut statuses = HashMap::new();
            let mut results = Vec::new();

            for ((task, task_fields), pick) in fields.iter().zip(picks.iter()) {
                // index 6 leaves the task out entirely
                let Some(status) = STATUSES.get(*pick).copied() else {
                    continue;
                };
                statuses.insert(task.clone(), status);
                let result = if status == TaskStatus::Success {
                    let output = task_fields
                        .iter()
                        .fold(TaskOutput::default(), |out, f| out.with_field(f.clone(), percent));
                    succeeded(task, output)
                } else {
                    finished_with(task, status, "simulated")
                };
                results.push(result);
            }

            let mapping = RubricMapper::new(&rubric).map(&results);
            prop_assert_eq!(mapping.entries.len(), rubric.criteria().count());
            for (entry, (_, criterion)) in mapping.entries.iter().zip(rubric.criteria()) {
                let ok = statuses.get(&criterion.source.task) == Some(&TaskStatus::Success);
                prop_assert_eq!(entry.is_scored(), ok);
                prop_assert!(entry.points >= 0.0 && entry.points <= criterion.weight);
                if !entry.is_scored() {
                    prop_assert_eq!(entry.points, 0.0);
                    prop_assert!(entry.reason.is_some());
                }
            }
            let unscored = mapping.entries.iter().filter(|e| !e.is_scored()).count();
            prop_assert_eq!(mapping.warnings.len(), unscored);
        }

        #[test]
        fn prop_interpolation_is_monotone(
            weight in 1u32..=20,
            a in 0.0f64..=100.0,
            b in 0.0f64..=100.0,
        ) {
            let weight = f64::from(weight);
            let bands = standard_bands(weight);
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let (_, p_lo) = interpolate(&bands, lo).unwrap();
            let (_, p_hi) = interpolate(&bands, hi).unwrap();
            prop_assert!(p_lo <= p_hi);
            prop_assert!(p_hi <= weight + 1e-9);
        }
    }
}
