//! Chart instructions and the extractor that scrapes them out of model text.

use crate::execution::TabularResult;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;

lazy_static! {
    // Start of any JSON object; the strict parse decides whether it is ours.
    static ref OBJECT_START: Regex = Regex::new(r#"\{\s*""#).unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Scatter,
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChartType::Bar => write!(f, "bar"),
            ChartType::Line => write!(f, "line"),
            ChartType::Scatter => write!(f, "scatter"),
        }
    }
}

/// One y column or several plotted against the same x.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AxisColumns {
    Single(String),
    Multiple(Vec<String>),
}

impl AxisColumns {
    pub fn names(&self) -> Vec<&str> {
        match self {
            AxisColumns::Single(name) => vec![name.as_str()],
            AxisColumns::Multiple(names) => names.iter().map(|n| n.as_str()).collect(),
        }
    }
}

impl fmt::Display for AxisColumns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names().join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartInstruction {
    pub chart_type: ChartType,
    pub x: String,
    pub y: AxisColumns,
}

/// Chart JSON that parsed but cannot be drawn from the table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChartRenderError {
    #[error("column '{column}' for the {axis}-axis is not in the result (available: {available})")]
    UnknownColumn {
        axis: &'static str,
        column: String,
        available: String,
    },

    #[error("no columns given for the y-axis")]
    EmptyYAxis,
}

impl ChartInstruction {
    /// Check every referenced column against the table it will be drawn from.
    pub fn validate(&self, table: &TabularResult) -> Result<(), ChartRenderError> {
        let unknown = |axis: &'static str, column: &str| ChartRenderError::UnknownColumn {
            axis,
            column: column.to_string(),
            available: table.columns.join(", "),
        };

        if !table.has_column(&self.x) {
            return Err(unknown("x", &self.x));
        }

        let ys = self.y.names();
        if ys.is_empty() {
            return Err(ChartRenderError::EmptyYAxis);
        }
        for y in ys {
            if !table.has_column(y) {
                return Err(unknown("y", y));
            }
        }

        Ok(())
    }

    pub fn describe(&self) -> String {
        format!(
            "Plotting a {} chart with x={}, y={}.",
            self.chart_type, self.x, self.y
        )
    }
}

/// First chart instruction object embedded in `response_text`.
///
/// Candidates are located with a regex and then parsed strictly; anything that
/// fails to parse is skipped, so malformed output yields `None` rather than an
/// error.
pub fn extract_chart_instruction(response_text: &str) -> Option<ChartInstruction> {
    for candidate in OBJECT_START.find_iter(response_text) {
        let mut objects = serde_json::Deserializer::from_str(&response_text[candidate.start()..])
            .into_iter::<ChartInstruction>();
        match objects.next() {
            Some(Ok(instruction)) => return Some(instruction),
            Some(Err(e)) => debug!("Skipping non-chart JSON candidate: {}", e),
            None => {}
        }
    }
    None
}
