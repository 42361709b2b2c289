//! Tabular Result - rows returned by a successful SQL statement

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Named columns plus positional rows, in statement order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TabularResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl TabularResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// True when there is nothing to show or plot.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.columns.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All values of one column, top to bottom.
    pub fn column_values(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(idx).unwrap_or(&Value::Null))
                .collect(),
        )
    }

    /// Plain-text grid of the first `max_rows` rows.
    pub fn render_preview(&self, max_rows: usize) -> String {
        let shown: Vec<Vec<String>> = self
            .rows
            .iter()
            .take(max_rows)
            .map(|row| {
                (0..self.columns.len())
                    .map(|i| render_cell(row.get(i).unwrap_or(&Value::Null)))
                    .collect()
            })
            .collect();

        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, name)| {
                shown
                    .iter()
                    .map(|r| r[i].chars().count())
                    .chain(std::iter::once(name.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut out = String::new();
        out.push_str(&format_line(&self.columns, &widths));
        out.push('\n');
        out.push_str(
            &widths
                .iter()
                .map(|w| "-".repeat(*w))
                .collect::<Vec<_>>()
                .join("-+-"),
        );
        for row in &shown {
            out.push('\n');
            out.push_str(&format_line(row, &widths));
        }
        if self.rows.len() > max_rows {
            out.push_str(&format!("\n... {} more rows", self.rows.len() - max_rows));
        }
        out.push_str(&format!(
            "\n[{} rows x {} columns]",
            self.rows.len(),
            self.columns.len()
        ));
        out
    }
}

impl fmt::Display for TabularResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render_preview(10))
    }
}

fn format_line(cells: &[String], widths: &[usize]) -> String {
    cells
        .iter()
        .zip(widths)
        .map(|(cell, w)| format!("{:<width$}", cell, width = *w))
        .collect::<Vec<_>>()
        .join(" | ")
        .trim_end()
        .to_string()
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn revenue() -> TabularResult {
        TabularResult::new(
            vec!["Month".to_string(), "Revenue".to_string()],
            vec![
                vec![json!("Jan"), json!(100)],
                vec![json!("Feb"), json!(250.5)],
                vec![json!("Mar"), Value::Null],
            ],
        )
    }

    #[test]
    fn test_column_lookup() {
        let table = revenue();
        assert!(table.has_column("Month"));
        assert!(!table.has_column("month"));
        assert_eq!(table.column_index("Revenue"), Some(1));
        assert_eq!(table.column_values("Month").unwrap().len(), 3);
    }

    #[test]
    fn test_empty_detection() {
        assert!(TabularResult::default().is_empty());
        let no_rows = TabularResult::new(vec!["a".to_string()], vec![]);
        assert!(no_rows.is_empty());
        assert!(!revenue().is_empty());
    }

    #[test]
    fn test_render_preview_truncates() {
        let preview = revenue().render_preview(2);
        let lines: Vec<&str> = preview.lines().collect();
        assert_eq!(lines[0], "Month | Revenue");
        assert_eq!(lines[2], "Jan   | 100");
        assert!(preview.contains("... 1 more rows"));
        assert!(preview.ends_with("[3 rows x 2 columns]"));
    }
}
