//! Builds the per-submission report from task results and scores.

use crate::models::{
    CategorySection, CriterionSection, ScoreEntry, SubmissionReport, TaskResult, Total,
};
use crate::rubric::{Mapping, Rubric, RubricMapper};
use crate::scoring::{category_points, category_unscored, total};
use std::collections::HashMap;

/// Assembles [`SubmissionReport`]s against one rubric.
#[derive(Debug, Clone, Copy)]
pub struct ReportAggregator<'a> {
    rubric: &'a Rubric,
}

impl<'a> ReportAggregator<'a> {
    pub fn new(rubric: &'a Rubric) -> Self {
        Self { rubric }
    }

    /// Map, total and assemble in one step.
    pub fn assess(&self, submission_id: &str, task_results: Vec<TaskResult>) -> SubmissionReport {
        let mapping = RubricMapper::new(self.rubric).map(&task_results);
        let total = total(&mapping.entries);
        self.build(submission_id, task_results, mapping, total)
    }

    /// Assemble a report. Every criterion gets a section, in rubric order,
    /// whether it was scored or not.
    pub fn build(
        &self,
        submission_id: &str,
        task_results: Vec<TaskResult>,
        mapping: Mapping,
        total: Total,
    ) -> SubmissionReport {
        let sections = self.sections(&task_results, &mapping.entries);
        let warnings = mapping.warnings.iter().map(|w| w.to_string()).collect();

        SubmissionReport {
            submission_id: submission_id.to_string(),
            rubric_name: self.rubric.name.clone(),
            sections,
            task_results,
            score_entries: mapping.entries,
            total,
            warnings,
        }
    }

    fn sections(&self, task_results: &[TaskResult], entries: &[ScoreEntry]) -> Vec<CategorySection> {
        let by_task: HashMap<&str, &TaskResult> =
            task_results.iter().map(|r| (r.task.as_str(), r)).collect();
        let by_criterion: HashMap<&str, &ScoreEntry> =
            entries.iter().map(|e| (e.criterion_id.as_str(), e)).collect();
        let points = category_points(entries);
        let unscored = category_unscored(entries);

        self.rubric
            .categories
            .iter()
            .map(|category| CategorySection {
                category_id: category.id.clone(),
                name: category.name.clone(),
                bonus: category.bonus,
                weight: category.weight(),
                points: points.get(&category.id).copied().unwrap_or(0.0),
                unscored_count: unscored.get(&category.id).copied().unwrap_or(0),
                criteria: category
                    .criteria
                    .iter()
                    .filter_map(|criterion| {
                        let entry = by_criterion.get(criterion.id.as_str())?;
                        let result = by_task.get(criterion.source.task.as_str());
                        Some(CriterionSection {
                            criterion_id: criterion.id.clone(),
                            name: criterion.name.clone(),
                            weight: criterion.weight,
                            source_task: criterion.source.task.clone(),
                            source_field: criterion.source.field.clone(),
                            task_status: result.map(|r| r.status),
                            entry: (*entry).clone(),
                            summary: result
                                .and_then(|r| r.output.as_ref())
                                .and_then(|o| o.summary.clone()),
                        })
                    })
                    .collect(),
            })
            .collect()
    }
}
