//! Rubric definition, loading and validation.
//!
//! A rubric is a list of categories, each holding weighted criteria. Every
//! criterion names the task and output field it is scored from and carries
//! four ordered performance bands. Weights are checked once, at load time.

pub mod mapper;

pub use mapper::{interpolate, Mapping, MappingWarning, RubricMapper};

use crate::error::RubricError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use tracing::{debug, info};

/// Mandatory criteria must add up to exactly this many points.
pub const MANDATORY_TOTAL: f64 = 100.0;

/// Maximum number of bonus points.
pub const BONUS_CEILING: f64 = 5.0;

/// Every criterion has exactly this many bands.
pub const BAND_COUNT: usize = 4;

const WEIGHT_TOLERANCE: f64 = 1e-6;

const DEFAULT_RUBRIC: &str = include_str!("default_rubric.toml");

/// The complete scoring scheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rubric {
    pub name: String,
    pub categories: Vec<Category>,
}

/// A group of criteria. At most one category may be the bonus category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub bonus: bool,
    pub criteria: Vec<Criterion>,
}

/// A single scored line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub id: String,
    pub name: String,
    /// Maximum points.
    pub weight: f64,
    pub source: SourceSelector,
    /// Ordered from lowest to highest. Empty in the document means the standard scale.
    #[serde(default)]
    pub bands: Vec<Band>,
}

/// Where a criterion's value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSelector {
    pub task: String,
    pub field: String,
}

/// One performance tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub label: String,
    /// Inclusive percentage range `[low, high]`.
    pub percent: [f64; 2],
    /// Inclusive point range `[low, high]`.
    pub points: [f64; 2],
}

impl Band {
    /// Midpoint of the percentage range, rounded to the nearest 0.5.
    pub fn midpoint(&self) -> f64 {
        let mid = (self.percent[0] + self.percent[1]) / 2.0;
        (mid * 2.0).round() / 2.0
    }
}

/// Fail/Pass/Credit/Distinction scale scaled to a criterion weight.
pub fn standard_bands(weight: f64) -> Vec<Band> {
    let tiers = [
        ("Fail", 0.0, 49.0, 50.0),
        ("Pass", 50.0, 64.0, 65.0),
        ("Credit", 65.0, 74.0, 75.0),
    ];
    let mut bands: Vec<Band> = tiers
        .iter()
        .map(|&(label, low, high, next)| Band {
            label: label.to_string(),
            percent: [low, high],
            points: [round2(low * weight / 100.0), round2(next * weight / 100.0 - 0.01)],
        })
        .collect();
    bands.push(Band {
        label: "Distinction".to_string(),
        percent: [75.0, 100.0],
        points: [round2(0.75 * weight), weight],
    });
    bands
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl Rubric {
    /// Load and validate a rubric from a TOML file.
    pub fn load(path: &Path) -> Result<Self, RubricError> {
        let content = std::fs::read_to_string(path).map_err(|source| RubricError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let rubric = Self::from_toml_str(&content)?;
        info!("Loaded rubric '{}' from {}", rubric.name, path.display());
        Ok(rubric)
    }

    /// The embedded web-fundamentals rubric.
    pub fn builtin() -> Result<Self, RubricError> {
        Self::from_toml_str(DEFAULT_RUBRIC)
    }

    /// Parse, fill in standard bands, and validate.
    pub fn from_toml_str(content: &str) -> Result<Self, RubricError> {
        let mut rubric: Rubric = toml::from_str(content)?;
        for category in &mut rubric.categories {
            for criterion in &mut category.criteria {
                if criterion.bands.is_empty() {
                    criterion.bands = standard_bands(criterion.weight);
                }
            }
        }
        rubric.validate()?;
        debug!(
            categories = rubric.categories.len(),
            criteria = rubric.criteria().count(),
            "rubric validated"
        );
        Ok(rubric)
    }

    /// Check weights, ids and band layout.
    pub fn validate(&self) -> Result<(), RubricError> {
        let mut category_ids = HashSet::new();
        let mut criterion_ids = HashSet::new();

        if self.categories.iter().filter(|c| c.bonus).count() > 1 {
            return Err(RubricError::MultipleBonusCategories);
        }

        for category in &self.categories {
            if !category_ids.insert(category.id.as_str()) {
                return Err(RubricError::DuplicateId {
                    kind: "category",
                    id: category.id.clone(),
                });
            }
            if category.criteria.is_empty() {
                return Err(RubricError::EmptyCategory(category.id.clone()));
            }
            for criterion in &category.criteria {
                if !criterion_ids.insert(criterion.id.as_str()) {
                    return Err(RubricError::DuplicateId {
                        kind: "criterion",
                        id: criterion.id.clone(),
                    });
                }
                validate_criterion(criterion)?;
            }
        }

        let mandatory = self.mandatory_weight();
        if (mandatory - MANDATORY_TOTAL).abs() > WEIGHT_TOLERANCE {
            return Err(RubricError::MandatoryWeight { actual: mandatory });
        }

        let bonus = self.bonus_weight();
        if bonus > BONUS_CEILING + WEIGHT_TOLERANCE {
            return Err(RubricError::BonusWeight {
                actual: bonus,
                ceiling: BONUS_CEILING,
            });
        }

        Ok(())
    }

    /// All criteria in declaration order with their category.
    pub fn criteria(&self) -> impl Iterator<Item = (&Category, &Criterion)> {
        self.categories
            .iter()
            .flat_map(|cat| cat.criteria.iter().map(move |crit| (cat, crit)))
    }

    pub fn criterion(&self, id: &str) -> Option<(&Category, &Criterion)> {
        self.criteria().find(|(_, c)| c.id == id)
    }

    pub fn mandatory_weight(&self) -> f64 {
        self.categories
            .iter()
            .filter(|c| !c.bonus)
            .map(Category::weight)
            .sum()
    }

    pub fn bonus_weight(&self) -> f64 {
        self.categories
            .iter()
            .filter(|c| c.bonus)
            .map(Category::weight)
            .sum()
    }

    /// Output fields each task must provide, keyed by task name.
    pub fn required_fields(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut fields: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (_, criterion) in self.criteria() {
            fields
                .entry(criterion.source.task.clone())
                .or_default()
                .insert(criterion.source.field.clone());
        }
        fields
    }
}

impl Category {
    /// Sum of the criterion weights.
    pub fn weight(&self) -> f64 {
        self.criteria.iter().map(|c| c.weight).sum()
    }
}

fn validate_criterion(criterion: &Criterion) -> Result<(), RubricError> {
    let invalid = |message: String| RubricError::InvalidCriterion {
        criterion: criterion.id.clone(),
        message,
    };

    if !(criterion.weight.is_finite() && criterion.weight > 0.0) {
        return Err(invalid(format!(
            "weight must be positive, got {}",
            criterion.weight
        )));
    }
    if criterion.source.task.trim().is_empty() || criterion.source.field.trim().is_empty() {
        return Err(invalid("source task and field must be set".to_string()));
    }
    if criterion.bands.len() != BAND_COUNT {
        return Err(invalid(format!(
            "expected {} bands, got {}",
            BAND_COUNT,
            criterion.bands.len()
        )));
    }

    for (idx, band) in criterion.bands.iter().enumerate() {
        let [p_low, p_high] = band.percent;
        let [pt_low, pt_high] = band.points;
        if !(0.0..=100.0).contains(&p_low) || !(0.0..=100.0).contains(&p_high) || p_low > p_high {
            return Err(invalid(format!(
                "band '{}' has invalid percentage range {}-{}",
                band.label, p_low, p_high
            )));
        }
        if pt_low < 0.0 || pt_high > criterion.weight + WEIGHT_TOLERANCE || pt_low > pt_high {
            return Err(invalid(format!(
                "band '{}' has invalid point range {}-{}",
                band.label, pt_low, pt_high
            )));
        }

        if idx > 0 {
            let previous = &criterion.bands[idx - 1];
            if p_low <= previous.percent[0] || p_low < previous.percent[1] {
                return Err(invalid(format!(
                    "band '{}' overlaps or precedes band '{}'",
                    band.label, previous.label
                )));
            }
            if pt_low < previous.points[1] {
                return Err(invalid(format!(
                    "band '{}' awards fewer points than band '{}'",
                    band.label, previous.label
                )));
            }
        }
    }

    Ok(())
}
