//! Comparison table model and renderers.

use super::TableFormat;

/// One row per listed submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsRow {
    pub submission_id: String,
    /// One value per score column.
    pub values: Vec<String>,
    pub total: String,
    pub notes: String,
}

impl ResultsRow {
    /// Row for a submission without a usable report.
    pub fn not_available(submission_id: &str, columns: usize, notes: &str) -> Self {
        Self {
            submission_id: submission_id.to_string(),
            values: vec!["N/A".to_string(); columns],
            total: "N/A".to_string(),
            notes: notes.to_string(),
        }
    }

    fn cells(&self) -> Vec<&str> {
        let mut cells = Vec::with_capacity(self.values.len() + 3);
        cells.push(self.submission_id.as_str());
        cells.extend(self.values.iter().map(String::as_str));
        cells.push(self.total.as_str());
        cells.push(self.notes.as_str());
        cells
    }
}

/// Cross-submission comparison table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsTable {
    pub title: String,
    /// Score column headers, in rubric order.
    pub columns: Vec<String>,
    pub rows: Vec<ResultsRow>,
}

impl ResultsTable {
    fn headers(&self) -> Vec<&str> {
        let mut headers = Vec::with_capacity(self.columns.len() + 3);
        headers.push("Submission");
        headers.extend(self.columns.iter().map(String::as_str));
        headers.push("Total");
        headers.push("Notes");
        headers
    }

    pub fn render(&self, format: TableFormat) -> String {
        match format {
            TableFormat::Markdown => self.render_markdown(),
            TableFormat::Ascii => self.render_ascii(),
        }
    }

    /// Render as a Markdown table.
    pub fn render_markdown(&self) -> String {
        let headers = self.headers();
        let mut output = format!("# {}\n\n", self.title);

        output.push_str(&format!("| {} |\n", headers.join(" | ")));
        let mut align = vec![":---"];
        align.extend(std::iter::repeat("---:").take(self.columns.len() + 1));
        align.push(":---");
        output.push_str(&format!("|{}|\n", align.join("|")));

        for row in &self.rows {
            let cells: Vec<String> = row.cells().iter().map(|c| escape(c)).collect();
            output.push_str(&format!("| {} |\n", cells.join(" | ")));
        }

        output
    }

    /// Render as a fixed-width table.
    pub fn render_ascii(&self) -> String {
        let headers = self.headers();
        let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.cells().iter().enumerate() {
                if let Some(w) = widths.get_mut(i) {
                    *w = (*w).max(cell.chars().count());
                }
            }
        }

        let line = |cells: &[&str]| -> String {
            let padded: Vec<String> = cells
                .iter()
                .zip(&widths)
                .enumerate()
                .map(|(i, (cell, w))| {
                    // id and notes left-aligned, scores right-aligned
                    if i == 0 || i + 1 == cells.len() {
                        format!("{:<w$}", cell, w = *w)
                    } else {
                        format!("{:>w$}", cell, w = *w)
                    }
                })
                .collect();
            format!("{}\n", padded.join(" | ").trim_end())
        };

        let mut output = format!("{}\n", self.title);
        let rule_width = widths.iter().sum::<usize>() + 3 * widths.len().saturating_sub(1);
        output.push_str(&"=".repeat(rule_width));
        output.push_str("\n\n");

        output.push_str(&line(&headers));
        let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        output.push_str(&format!("{}\n", separator.join("-+-")));

        for row in &self.rows {
            output.push_str(&line(&row.cells()));
        }

        output
    }
}

fn escape(cell: &str) -> String {
    cell.replace('|', "\\|")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ResultsTable {
        ResultsTable {
            title: "Assessment Results".to_string(),
            columns: vec!["Design".to_string(), "Deployment".to_string()],
            rows: vec![
                ResultsRow {
                    submission_id: "s1".to_string(),
                    values: vec!["12.50".to_string(), "9.00".to_string()],
                    total: "21.50".to_string(),
                    notes: String::new(),
                },
                ResultsRow::not_available("s2", 2, "no report"),
            ],
        }
    }

    #[test]
    fn test_render_markdown() {
        let md = table().render_markdown();
        let lines: Vec<_> = md.lines().collect();
        assert_eq!(lines[0], "# Assessment Results");
        assert_eq!(lines[2], "| Submission | Design | Deployment | Total | Notes |");
        assert_eq!(lines[3], "|:---|---:|---:|---:|:---|");
        assert_eq!(lines[4], "| s1 | 12.50 | 9.00 | 21.50 |  |");
        assert_eq!(lines[5], "| s2 | N/A | N/A | N/A | no report |");
    }

    #[test]
    fn test_render_ascii_aligns_columns() {
        let ascii = table().render_ascii();
        let lines: Vec<_> = ascii.lines().collect();
        assert_eq!(lines[2], "Submission | Design | Deployment | Total | Notes");
        assert_eq!(lines[3], "-----------+--------+------------+-------+----------");
        assert_eq!(lines[4], "s1         |  12.50 |       9.00 | 21.50 |");
        assert_eq!(lines[5], "s2         |    N/A |        N/A |   N/A | no report");
    }
}
