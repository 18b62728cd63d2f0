//! Task dependency graph.

use crate::error::GraphError;
use crate::task::AnalysisTaskSpec;
use std::collections::{HashMap, HashSet};

/// Validated, acyclic graph of task specs.
///
/// Disabled tasks stay in the graph so their dependents can be skipped.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    /// Specs in configuration order.
    specs: Vec<AnalysisTaskSpec>,
    /// task -> tasks that depend on it.
    downstream: HashMap<String, Vec<String>>,
    /// task -> its dependencies.
    upstream: HashMap<String, Vec<String>>,
    /// Dependency levels; every task appears after all of its dependencies.
    levels: Vec<Vec<String>>,
}

impl TaskGraph {
    /// Build and validate the graph.
    pub fn new(specs: Vec<AnalysisTaskSpec>) -> Result<Self, GraphError> {
        let mut names = HashSet::new();
        for spec in &specs {
            if !names.insert(spec.name.as_str()) {
                return Err(GraphError::DuplicateTask(spec.name.clone()));
            }
        }

        let mut downstream: HashMap<String, Vec<String>> = HashMap::new();
        let mut upstream: HashMap<String, Vec<String>> = HashMap::new();

        for spec in &specs {
            downstream.entry(spec.name.clone()).or_default();
            let deps = upstream.entry(spec.name.clone()).or_default();

            for dep in &spec.depends_on {
                if *dep == spec.name {
                    return Err(GraphError::SelfDependency(spec.name.clone()));
                }
                if !names.contains(dep.as_str()) {
                    return Err(GraphError::UnknownDependency {
                        task: spec.name.clone(),
                        dependency: dep.clone(),
                    });
                }
                if !deps.contains(dep) {
                    deps.push(dep.clone());
                }
            }
        }

        for spec in &specs {
            for dep in &upstream[&spec.name] {
                downstream
                    .entry(dep.clone())
                    .or_default()
                    .push(spec.name.clone());
            }
        }

        let levels = layer(&specs, &upstream)?;

        Ok(Self {
            specs,
            downstream,
            upstream,
            levels,
        })
    }

    /// Specs in configuration order.
    pub fn specs(&self) -> &[AnalysisTaskSpec] {
        &self.specs
    }

    pub fn spec(&self, name: &str) -> Option<&AnalysisTaskSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Task names in configuration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.name.as_str())
    }

    /// Direct dependencies of a task.
    pub fn upstream(&self, name: &str) -> &[String] {
        self.upstream.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Tasks that directly depend on a task.
    pub fn downstream(&self, name: &str) -> &[String] {
        self.downstream
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Tasks grouped by dependency depth. Level 0 has no dependencies.
    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Kahn-style layering. Whatever cannot be placed sits on a cycle.
fn layer(
    specs: &[AnalysisTaskSpec],
    upstream: &HashMap<String, Vec<String>>,
) -> Result<Vec<Vec<String>>, GraphError> {
    let mut placed: HashSet<&str> = HashSet::new();
    let mut levels = Vec::new();

    while placed.len() < specs.len() {
        let level: Vec<String> = specs
            .iter()
            .filter(|s| !placed.contains(s.name.as_str()))
            .filter(|s| {
                upstream[&s.name]
                    .iter()
                    .all(|dep| placed.contains(dep.as_str()))
            })
            .map(|s| s.name.clone())
            .collect();

        if level.is_empty() {
            let stuck = specs
                .iter()
                .filter(|s| !placed.contains(s.name.as_str()))
                .map(|s| s.name.clone())
                .collect();
            return Err(GraphError::Cycle(stuck));
        }

        for name in &level {
            if let Some(spec) = specs.iter().find(|s| &s.name == name) {
                placed.insert(spec.name.as_str());
            }
        }
        levels.push(level);
    }

    Ok(levels)
}
