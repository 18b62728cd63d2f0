//! Analysis task backed by an external process.
//!
//! Analyzers are usually standalone scripts. A `CommandTask` runs one with
//! arguments templated from the submission parameters and reads back a JSON
//! object describing its structured output.

use super::{AnalysisTask, TaskContext};
use crate::error::TaskError;
use crate::models::TaskOutput;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Placeholders that are always available to command templates.
const BUILTIN_PLACEHOLDERS: &[&str] = &["output_dir", "submission_dir", "submission_id"];

/// How many trailing stderr lines go into a failure diagnostic.
const STDERR_TAIL_LINES: usize = 10;

/// External command configuration for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Program to execute.
    pub program: String,

    /// Arguments; `{name}` placeholders are substituted.
    #[serde(default)]
    pub args: Vec<String>,

    /// File (relative to the task output directory) holding the JSON result.
    /// Falls back to stdout when the file does not exist.
    #[serde(default = "default_result_file")]
    pub result_file: String,

    /// Extra environment variables; values may use placeholders.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_result_file() -> String {
    "result.json".to_string()
}

impl CommandSpec {
    /// Submission parameters referenced by the templates.
    pub fn parameter_placeholders(&self) -> BTreeSet<String> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .chain(self.env.values().map(String::as_str))
            .flat_map(placeholder_names)
            .filter(|name| !BUILTIN_PLACEHOLDERS.contains(&name.as_str()))
            .collect()
    }
}

/// Runs a [`CommandSpec`] as an [`AnalysisTask`].
pub struct CommandTask {
    name: String,
    spec: CommandSpec,
}

impl CommandTask {
    pub fn new(name: impl Into<String>, spec: CommandSpec) -> Self {
        Self {
            name: name.into(),
            spec,
        }
    }

    fn render(&self, template: &str, ctx: &TaskContext) -> Result<String, TaskError> {
        render_template(template, |name| match name {
            "output_dir" => Some(ctx.output_dir.display().to_string()),
            "submission_dir" => Some(ctx.submission_dir.display().to_string()),
            "submission_id" => Some(ctx.submission.id.clone()),
            other => ctx.param(other).map(str::to_string),
        })
        .map_err(TaskError::ParameterNotProvided)
    }
}

#[async_trait]
impl AnalysisTask for CommandTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        let program = self.render(&self.spec.program, &ctx)?;
        let args = self
            .spec
            .args
            .iter()
            .map(|a| self.render(a, &ctx))
            .collect::<Result<Vec<_>, _>>()?;
        let mut env = BTreeMap::new();
        for (key, value) in &self.spec.env {
            env.insert(key.clone(), self.render(value, &ctx)?);
        }

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            submission = %ctx.submission.id,
            task = %self.name,
            program = %program,
            "spawning analyzer"
        );
        debug!("Full command: {:?}", cmd);

        let output = cmd.output().await.map_err(|source| TaskError::Spawn {
            program: program.clone(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        tokio::fs::write(ctx.output_dir.join("stdout.log"), &stdout).await?;
        tokio::fs::write(ctx.output_dir.join("stderr.log"), &stderr).await?;

        if !output.status.success() {
            return Err(TaskError::NonZeroExit {
                status: output.status.to_string(),
                stderr: tail(&stderr, STDERR_TAIL_LINES),
            });
        }

        let result_path = ctx.output_dir.join(&self.spec.result_file);
        let raw = if tokio::fs::try_exists(&result_path).await.unwrap_or(false) {
            tokio::fs::read_to_string(&result_path).await?
        } else {
            stdout
        };

        let mut parsed = parse_output(&raw)?;
        parsed.artifacts.push("stdout.log".to_string());
        parsed.artifacts.push("stderr.log".to_string());
        Ok(parsed)
    }
}

/// Parse a task's JSON result.
///
/// Accepts either `{"fields": {...}, "summary": "...", "artifacts": [...]}`
/// or a flat object whose keys (other than `summary`/`artifacts`) are fields.
pub fn parse_output(raw: &str) -> Result<TaskOutput, TaskError> {
    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|e| TaskError::InvalidOutput(format!("not valid JSON: {}", e)))?;
    let Value::Object(mut object) = value else {
        return Err(TaskError::InvalidOutput(
            "expected a JSON object".to_string(),
        ));
    };

    let summary = match object.remove("summary") {
        Some(Value::String(s)) => Some(s),
        Some(Value::Null) | None => None,
        Some(_) => {
            return Err(TaskError::InvalidOutput(
                "'summary' must be a string".to_string(),
            ))
        }
    };

    let artifacts = match object.remove("artifacts") {
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                _ => Err(TaskError::InvalidOutput(
                    "'artifacts' must contain strings".to_string(),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(Value::Null) | None => Vec::new(),
        Some(_) => {
            return Err(TaskError::InvalidOutput(
                "'artifacts' must be an array".to_string(),
            ))
        }
    };

    let fields = match object.remove("fields") {
        Some(Value::Object(fields)) => fields.into_iter().collect(),
        Some(_) => {
            return Err(TaskError::InvalidOutput(
                "'fields' must be an object".to_string(),
            ))
        }
        None => object.into_iter().collect(),
    };

    Ok(TaskOutput {
        fields,
        summary,
        artifacts,
    })
}

/// Names of `{placeholder}` occurrences in a template.
pub fn placeholder_names(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_placeholder_name(&after[..close]) => {
                names.push(after[..close].to_string());
                rest = &after[close + 1..];
            }
            _ => rest = after,
        }
    }
    names
}

/// Substitute placeholders; the error carries the first unresolved name.
pub fn render_template(
    template: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_placeholder_name(&after[..close]) => {
                let name = &after[..close];
                let value = lookup(name).ok_or_else(|| name.to_string())?;
                out.push_str(&value);
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

fn is_placeholder_name(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn tail(text: &str, lines: usize) -> String {
    let collected: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = collected.len().saturating_sub(lines);
    collected[start..].join("\n")
}
