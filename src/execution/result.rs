//! Query Result - Tabular rows returned by a data store

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One result row: column name -> scalar, in the data store's column order.
pub type Row = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names, in select-list order
    pub columns: Vec<String>,

    /// Rows, in the order the data store returned them
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First `limit` rows.
    pub fn sample(&self, limit: usize) -> &[Row] {
        &self.rows[..self.rows.len().min(limit)]
    }

    /// Export as CSV with a header row.
    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(&self.columns)
            .map_err(|e| PipelineError::Execution(format!("CSV export failed: {}", e)))?;
        for row in &self.rows {
            let record: Vec<String> = self
                .columns
                .iter()
                .map(|c| cell_text(row.get(c).unwrap_or(&Value::Null)))
                .collect();
            writer
                .write_record(&record)
                .map_err(|e| PipelineError::Execution(format!("CSV export failed: {}", e)))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| PipelineError::Execution(format!("CSV export failed: {}", e)))?;
        String::from_utf8(bytes).map_err(|e| PipelineError::Execution(format!("CSV export failed: {}", e)))
    }

    /// Plain-text table for terminal output, showing at most `max_rows` rows.
    pub fn render_table(&self, max_rows: usize) -> String {
        let shown = self.sample(max_rows);
        let cells: Vec<Vec<String>> = shown
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .map(|c| cell_text(row.get(c).unwrap_or(&Value::Null)))
                    .collect()
            })
            .collect();

        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                cells
                    .iter()
                    .map(|r| r[idx].chars().count())
                    .chain(std::iter::once(name.chars().count()))
                    .max()
                    .unwrap_or(0)
                    .min(40)
            })
            .collect();

        let format_line = |values: Vec<&str>| -> String {
            values
                .iter()
                .zip(&widths)
                .map(|(v, w)| {
                    let clipped: String = v.chars().take(*w).collect();
                    format!("{:<width$}", clipped, width = *w)
                })
                .collect::<Vec<_>>()
                .join(" | ")
        };

        let mut lines = vec![format_line(self.columns.iter().map(String::as_str).collect())];
        lines.push(widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("-+-"));
        for row in &cells {
            lines.push(format_line(row.iter().map(String::as_str).collect()));
        }
        if self.rows.len() > shown.len() {
            lines.push(format!(
                "... {} more rows ({} total)",
                self.rows.len() - shown.len(),
                self.rows.len()
            ));
        }
        lines.join("\n")
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
