//! Submission list loading.
//!
//! The submission list is a small CSV file with a header row. One column holds
//! the submission id; every other column becomes a named parameter. Cells
//! equal to `none`, `n/a` or empty mean "not provided". A malformed data row
//! is set aside as a [`RejectedRow`]; only a broken header or duplicate ids
//! reject the whole list.

use crate::error::RegistryError;
use crate::models::SubmissionRecord;
use std::collections::HashSet;
use std::path::{Component, Path};
use tracing::{debug, info, warn};

/// Cell values that mark an optional parameter as not provided.
const NOT_PROVIDED: &[&str] = &["none", "n/a", ""];

/// Returns true if a cell value is the "not provided" sentinel.
pub fn is_not_provided(value: &str) -> bool {
    let value = value.trim();
    NOT_PROVIDED.iter().any(|s| value.eq_ignore_ascii_case(s))
}

/// Check that a submission id names exactly one directory below the output
/// root: no separators, no `.` or `..`, no absolute paths.
pub fn validate_submission_id(id: &str) -> Result<(), RegistryError> {
    let mut components = Path::new(id).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single || id.contains(['/', '\\']) || id.chars().any(char::is_control) {
        return Err(RegistryError::InvalidId { id: id.to_string() });
    }
    Ok(())
}

/// A data row that could not be turned into a submission. It aborts only
/// that submission, never the whole list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRow {
    pub line: usize,
    /// The id cell, when the row had a usable one.
    pub id: Option<String>,
    pub reason: String,
}

impl RejectedRow {
    /// The id if known, otherwise the line number.
    pub fn label(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("line {}", self.line),
        }
    }
}

/// The validated, immutable list of submissions for a run.
#[derive(Debug, Clone, Default)]
pub struct SubmissionRegistry {
    records: Vec<SubmissionRecord>,
    rejected: Vec<RejectedRow>,
}

impl SubmissionRegistry {
    /// Load a submission list from a CSV file.
    pub fn load(path: &Path, id_column: &str) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path).map_err(|source| RegistryError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let registry = Self::from_csv_str(&content, id_column)?;
        info!(
            "Loaded {} submissions from {}",
            registry.len(),
            path.display()
        );
        Ok(registry)
    }

    /// Parse a submission list from CSV text.
    pub fn from_csv_str(content: &str, id_column: &str) -> Result<Self, RegistryError> {
        let mut lines = content
            .lines()
            .enumerate()
            .map(|(idx, line)| (idx + 1, line))
            .filter(|(_, line)| {
                let trimmed = line.trim();
                !trimmed.is_empty() && !trimmed.starts_with('#')
            });

        let (header_line, header) = lines.next().ok_or(RegistryError::Empty)?;
        let columns: Vec<String> = split_row(header, header_line)?
            .into_iter()
            .map(|c| c.trim().to_string())
            .collect();

        let id_idx = columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(id_column))
            .ok_or_else(|| RegistryError::MissingIdColumn(id_column.to_string()))?;

        let mut records = Vec::new();
        let mut rejected = Vec::new();
        for (line_no, line) in lines {
            match parse_record(line, line_no, &columns, id_idx) {
                Ok(record) => {
                    debug!(submission = %record.id, params = record.params.len(), "parsed submission");
                    records.push(record);
                }
                Err((id, e)) => {
                    warn!("Rejecting submission row: {}", e);
                    rejected.push(RejectedRow {
                        line: line_no,
                        id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let mut registry = Self::from_records(records)?;
        registry.rejected = rejected;
        Ok(registry)
    }

    /// Build a registry from already-parsed records, rejecting duplicate ids
    /// and ids that are not a plain directory name.
    pub fn from_records(records: Vec<SubmissionRecord>) -> Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        for record in &records {
            validate_submission_id(&record.id)?;
            if !seen.insert(record.id.as_str()) {
                return Err(RegistryError::DuplicateId {
                    id: record.id.clone(),
                });
            }
        }
        Ok(Self {
            records,
            rejected: Vec::new(),
        })
    }

    /// Keep only the given ids, in registry order.
    pub fn select(&self, ids: &[String]) -> Result<Self, RegistryError> {
        let is_rejected = |id: &String| self.rejected.iter().any(|r| r.id.as_ref() == Some(id));
        if let Some(unknown) = ids
            .iter()
            .find(|id| self.get(id).is_none() && !is_rejected(id))
        {
            return Err(RegistryError::UnknownId(unknown.clone()));
        }
        let records = self
            .records
            .iter()
            .filter(|r| ids.contains(&r.id))
            .cloned()
            .collect();
        let rejected = self
            .rejected
            .iter()
            .filter(|r| r.id.as_ref().is_some_and(|id| ids.contains(id)))
            .cloned()
            .collect();
        Ok(Self { records, rejected })
    }

    pub fn records(&self) -> &[SubmissionRecord] {
        &self.records
    }

    /// Rows that were not loaded, in file order.
    pub fn rejected(&self) -> &[RejectedRow] {
        &self.rejected
    }

    pub fn get(&self, id: &str) -> Option<&SubmissionRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Submission ids in list order.
    pub fn ids(&self) -> Vec<String> {
        self.records.iter().map(|r| r.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Turn one data row into a record. On failure, returns the row's id cell (if
/// usable) alongside the error.
fn parse_record(
    line: &str,
    line_no: usize,
    columns: &[String],
    id_idx: usize,
) -> Result<SubmissionRecord, (Option<String>, RegistryError)> {
    let cells = split_row(line, line_no).map_err(|e| (None, e))?;
    let id = cells
        .get(id_idx)
        .map(|cell| cell.trim())
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    if cells.len() != columns.len() {
        return Err((
            id,
            RegistryError::CellCount {
                line: line_no,
                expected: columns.len(),
                found: cells.len(),
            },
        ));
    }
    let Some(id) = id else {
        return Err((None, RegistryError::EmptyId { line: line_no }));
    };
    validate_submission_id(&id).map_err(|e| (None, e))?;

    let mut record = SubmissionRecord::new(id);
    for (idx, (column, cell)) in columns.iter().zip(cells.iter()).enumerate() {
        if idx == id_idx {
            continue;
        }
        let value = if is_not_provided(cell) {
            None
        } else {
            Some(cell.trim())
        };
        record = record.with_param(column.clone(), value);
    }
    Ok(record)
}

/// Split one CSV row. Supports double-quoted cells with `""` escapes.
fn split_row(line: &str, line_no: usize) -> Result<Vec<String>, RegistryError> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if current.trim().is_empty() => {
                current.clear();
                in_quotes = true;
            }
            ',' if !in_quotes => cells.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }

    if in_quotes {
        return Err(RegistryError::UnterminatedQuote { line: line_no });
    }
    cells.push(current);
    Ok(cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const ROSTER: &str = "\
# cohort 2024
id,repo_url,deploy_url
1001,https://github.com/a/site.git,https://a.netlify.app
1002,https://github.com/b/site.git,none

1003,\"https://github.com/c/site.git\",N/A
";

    #[test]
    fn test_parse_roster() {
        let registry = SubmissionRegistry::from_csv_str(ROSTER, "id").unwrap();
        assert_eq!(registry.ids(), vec!["1001", "1002", "1003"]);

        let first = registry.get("1001").unwrap();
        assert_eq!(first.param("deploy_url"), Some("https://a.netlify.app"));

        let second = registry.get("1002").unwrap();
        assert!(second.has_param("deploy_url"));
        assert_eq!(second.param("deploy_url"), None);

        let third = registry.get("1003").unwrap();
        assert_eq!(third.param("repo_url"), Some("https://github.com/c/site.git"));
        assert_eq!(third.param("deploy_url"), None);
    }

    #[test]
    fn test_id_column_is_case_insensitive() {
        let csv = "Student,github\n7,none\n";
        let registry = SubmissionRegistry::from_csv_str(csv, "student").unwrap();
        assert_eq!(registry.ids(), vec!["7"]);
        assert_eq!(registry.get("7").unwrap().param("github"), None);
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let csv = "id,repo_url\n1,x\n1,y\n";
        let err = SubmissionRegistry::from_csv_str(csv, "id").unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateId { .. }));
    }

    #[test]
    fn test_bad_rows_are_set_aside() {
        let csv = "id,repo_url\n1,x\n2\n ,y\n3,\"z\n..,w\n4,v\n";
        let registry = SubmissionRegistry::from_csv_str(csv, "id").unwrap();
        assert_eq!(registry.ids(), vec!["1", "4"]);

        let rejected = registry.rejected();
        assert_eq!(rejected.len(), 4);
        assert_eq!(rejected[0].line, 3);
        assert_eq!(rejected[0].label(), "2");
        assert_eq!(rejected[0].reason, "line 3: expected 2 cells, found 1");
        assert_eq!(rejected[1].label(), "line 4");
        assert_eq!(rejected[1].reason, "line 4: submission id is empty");
        assert_eq!(rejected[2].reason, "line 5: unterminated quoted field");
        assert_eq!(rejected[3].label(), "line 6");
        assert!(rejected[3].reason.contains("cannot be used as a directory name"));
    }

    #[test]
    fn test_header_problems_reject_the_list() {
        let no_column = "name,repo_url\n1,x\n";
        assert!(matches!(
            SubmissionRegistry::from_csv_str(no_column, "id").unwrap_err(),
            RegistryError::MissingIdColumn(_)
        ));

        assert!(matches!(
            SubmissionRegistry::from_csv_str("# only a comment\n", "id").unwrap_err(),
            RegistryError::Empty
        ));
    }

    #[test]
    fn test_rejects_ids_that_escape_the_output_root() {
        for id in ["..", ".", "a/b", "/tmp/x", "..\\up", "tab\tid"] {
            let err = SubmissionRegistry::from_records(vec![SubmissionRecord::new(id)]).unwrap_err();
            assert!(
                matches!(&err, RegistryError::InvalidId { id: bad } if bad == id),
                "accepted {:?}",
                id
            );
        }

        for id in ["1001", "alice.smith", "team-3_b"] {
            assert!(validate_submission_id(id).is_ok(), "rejected {:?}", id);
        }
    }

    #[test]
    fn test_quoted_cells_with_commas() {
        let cells = split_row(r#"1,"a, b","say ""hi""""#, 1).unwrap();
        assert_eq!(cells, vec!["1", "a, b", "say \"hi\""]);
    }

    #[test]
    fn test_select_keeps_registry_order() {
        let registry = SubmissionRegistry::from_csv_str(ROSTER, "id").unwrap();
        let selected = registry
            .select(&["1003".to_string(), "1001".to_string()])
            .unwrap();
        assert_eq!(selected.ids(), vec!["1001", "1003"]);

        assert!(registry.select(&["9999".to_string()]).is_err());
    }

    #[test]
    fn test_select_keeps_rejected_rows() {
        let csv = "id,repo_url\n1,x\n2\n3,y\n";
        let registry = SubmissionRegistry::from_csv_str(csv, "id").unwrap();
        let selected = registry.select(&["2".to_string(), "3".to_string()]).unwrap();
        assert_eq!(selected.ids(), vec!["3"]);
        assert_eq!(selected.rejected().len(), 1);
        assert_eq!(selected.rejected()[0].label(), "2");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ROSTER.as_bytes()).unwrap();
        let registry = SubmissionRegistry::load(file.path(), "id").unwrap();
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_load_fixture_roster() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/submissions.csv");
        let registry = SubmissionRegistry::load(&path, "student").unwrap();
        assert_eq!(registry.ids(), vec!["alice", "bob", "carol"]);

        let bob = registry.get("bob").unwrap();
        assert_eq!(bob.param("netlify"), None);
        assert_eq!(bob.param("conversations"), Some("links/bob.txt"));

        let carol = registry.get("carol").unwrap();
        assert_eq!(carol.param("github"), Some("https://github.com/carol/web"));
        assert_eq!(carol.param("conversations"), None);
    }
}
