//! Totals and subtotals over score entries.

use crate::models::{ScoreEntry, Total};
use crate::rubric::{round2, BONUS_CEILING, MANDATORY_TOTAL};
use std::collections::HashMap;

/// Reduce score entries to a total.
///
/// Unscored entries are never summed; they are counted and listed instead.
/// Mandatory points are capped at 100 and bonus points at the bonus ceiling.
pub fn total(entries: &[ScoreEntry]) -> Total {
    let mut mandatory = 0.0;
    let mut bonus = 0.0;
    let mut mandatory_possible = 0.0;
    let mut unscored = Vec::new();

    for entry in entries {
        if !entry.is_scored() {
            unscored.push(entry.criterion_id.clone());
            continue;
        }
        let points = entry.points.max(0.0);
        if entry.bonus {
            bonus += points;
        } else {
            mandatory += points;
            mandatory_possible += entry.max_points;
        }
    }

    let mandatory = round2(mandatory).min(MANDATORY_TOTAL);
    let bonus = round2(bonus).min(BONUS_CEILING);

    Total {
        mandatory,
        bonus,
        total: round2(mandatory + bonus),
        mandatory_possible: round2(mandatory_possible),
        unscored_count: unscored.len(),
        unscored,
    }
}

/// Group entries by category id, keeping entry order within each group.
pub fn group_by_category(entries: &[ScoreEntry]) -> HashMap<String, Vec<&ScoreEntry>> {
    let mut grouped: HashMap<String, Vec<&ScoreEntry>> = HashMap::new();

    for entry in entries {
        grouped
            .entry(entry.category_id.clone())
            .or_default()
            .push(entry);
    }

    grouped
}

/// Sum of scored points per category. Unscored entries count as 0.
pub fn category_points(entries: &[ScoreEntry]) -> HashMap<String, f64> {
    group_by_category(entries)
        .into_iter()
        .map(|(category, entries)| {
            let sum = entries
                .iter()
                .filter(|e| e.is_scored())
                .map(|e| e.points)
                .sum::<f64>();
            (category, round2(sum))
        })
        .collect()
}

/// Number of unscored entries per category.
pub fn category_unscored(entries: &[ScoreEntry]) -> HashMap<String, usize> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for entry in entries.iter().filter(|e| !e.is_scored()) {
        *counts.entry(entry.category_id.clone()).or_default() += 1;
    }
    counts
}
