use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static MISSING_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(nan|null|none|n/a|-)?$").expect("valid missing-marker regex"));

/// A single cell as read from a sensor export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Missing,
    Number(f64),
    Text(String),
}

impl Value {
    /// Interpret a raw CSV cell. Blank cells and NaN markers are missing,
    /// decimal commas are accepted when no decimal point is present.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if MISSING_MARKER.is_match(trimmed) {
            return Value::Missing;
        }

        if let Ok(n) = trimmed.parse::<f64>() {
            return Value::from_f64(n);
        }

        if trimmed.contains(',') && !trimmed.contains('.') {
            if let Ok(n) = trimmed.replacen(',', ".", 1).parse::<f64>() {
                return Value::from_f64(n);
            }
        }

        Value::Text(trimmed.to_string())
    }

    pub fn from_f64(n: f64) -> Self {
        if n.is_nan() {
            Value::Missing
        } else {
            Value::Number(n)
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Render the cell for CSV output.
    pub fn render(&self) -> String {
        match self {
            Value::Missing => String::new(),
            Value::Number(n) => n.to_string(),
            Value::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn numeric(name: impl Into<String>, values: &[f64]) -> Self {
        Self::new(name, values.iter().map(|v| Value::from_f64(*v)).collect())
    }

    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_missing()).count()
    }

    /// True when every populated cell holds a number.
    pub fn is_numeric(&self) -> bool {
        self.values
            .iter()
            .all(|v| matches!(v, Value::Number(_) | Value::Missing))
    }
}

/// Column-major table. All columns share the same length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    rows: usize,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_columns(columns: Vec<Column>) -> Self {
        let mut table = Table::new();
        for column in columns {
            table.push_column(column);
        }
        table
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    /// Appends a column. The first column fixes the row count; later
    /// columns are padded with missing cells or truncated to match it.
    pub fn push_column(&mut self, mut column: Column) {
        if self.columns.is_empty() {
            self.rows = column.values.len();
        } else {
            column.values.resize(self.rows, Value::Missing);
        }
        self.columns.push(column);
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        let idx = self.columns.iter().position(|c| c.name == name)?;
        Some(self.columns.remove(idx))
    }

    pub fn truncate(&mut self, rows: usize) {
        if rows >= self.rows {
            return;
        }
        for column in &mut self.columns {
            column.values.truncate(rows);
        }
        self.rows = rows;
    }

    /// Drops the first `n` rows.
    pub fn skip_rows(&mut self, n: usize) {
        let n = n.min(self.rows);
        for column in &mut self.columns {
            column.values.drain(..n);
        }
        self.rows -= n;
    }

    /// Keeps the rows whose index maps to `true`.
    pub fn retain_rows<F>(&mut self, mut keep: F)
    where
        F: FnMut(usize) -> bool,
    {
        let mask: Vec<bool> = (0..self.rows).map(&mut keep).collect();
        for column in &mut self.columns {
            let mut idx = 0;
            column.values.retain(|_| {
                let k = mask[idx];
                idx += 1;
                k
            });
        }
        self.rows = mask.iter().filter(|k| **k).count();
    }

    pub fn row(&self, idx: usize) -> Vec<&Value> {
        self.columns.iter().map(|c| &c.values[idx]).collect()
    }
}

/// A table exactly as read from one input file.
#[derive(Debug, Clone)]
pub struct RawTable {
    pub file: String,
    pub table: Table,
}

/// What a source contributes when one of its columns is absent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FallbackPolicy {
    /// Abort the source with a missing-column error.
    Required,
    /// Substitute a constant.
    ZeroDefault(f64),
    /// Emit missing markers.
    PreserveMissing,
    /// Leave the column out of the contribution.
    Omit,
}

impl FallbackPolicy {
    /// Columns without a substitute value bound the common valid window.
    pub fn bounds_window(&self) -> bool {
        matches!(self, FallbackPolicy::Required | FallbackPolicy::Omit)
    }

    pub fn pad_value(&self) -> Value {
        match self {
            FallbackPolicy::ZeroDefault(v) => Value::Number(*v),
            _ => Value::Missing,
        }
    }
}

/// Maps one input column to its output name.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub source: String,
    pub output: String,
    pub aliases: Vec<String>,
    pub fallback: FallbackPolicy,
}

impl ColumnSpec {
    pub fn new(source: &str, output: &str, fallback: FallbackPolicy) -> Self {
        Self {
            source: source.to_string(),
            output: output.to_string(),
            aliases: Vec::new(),
            fallback,
        }
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Input names to try, primary name first.
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.source.as_str()).chain(self.aliases.iter().map(|a| a.as_str()))
    }
}

/// Per-source table after normalization and projection to output names.
#[derive(Debug, Clone)]
pub struct ExtractedTable {
    pub source: String,
    pub priority: i32,
    pub table: Table,
    pub policies: HashMap<String, FallbackPolicy>,
    pub issues: Vec<ValidationIssue>,
}

impl ExtractedTable {
    pub fn policy(&self, column: &str) -> FallbackPolicy {
        self.policies
            .get(column)
            .copied()
            .unwrap_or(FallbackPolicy::PreserveMissing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Blocking,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Blocking => write!(f, "blocking"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Gap,
    MissingBaseSource,
    MissingColumn,
    AmbiguousDetection,
    UnknownFile,
    DuplicateSource,
    LeadingTrim,
    DuplicateColumn,
    InvalidValues,
    Timestamp,
    SamplingRate,
    ParseFailure,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::Gap => "gap",
            IssueKind::MissingBaseSource => "missing_base_source",
            IssueKind::MissingColumn => "missing_column",
            IssueKind::AmbiguousDetection => "ambiguous_detection",
            IssueKind::UnknownFile => "unknown_file",
            IssueKind::DuplicateSource => "duplicate_source",
            IssueKind::LeadingTrim => "leading_trim",
            IssueKind::DuplicateColumn => "duplicate_column",
            IssueKind::InvalidValues => "invalid_values",
            IssueKind::Timestamp => "timestamp",
            IssueKind::SamplingRate => "sampling_rate",
            IssueKind::ParseFailure => "parse_failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub source: String,
    pub column: String,
    /// Length of the reported missing run (total count on the coarse path).
    pub run_length: usize,
    pub severity: Severity,
    pub kind: IssueKind,
    pub start_row: Option<usize>,
    pub missing_total: usize,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(
        kind: IssueKind,
        severity: Severity,
        source: &str,
        column: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source: source.to_string(),
            column: column.to_string(),
            run_length: 0,
            severity,
            kind,
            start_row: None,
            missing_total: 0,
            message: message.into(),
        }
    }

    pub fn warning(kind: IssueKind, source: &str, column: &str, message: impl Into<String>) -> Self {
        Self::new(kind, Severity::Warning, source, column, message)
    }

    pub fn with_run(mut self, start_row: Option<usize>, run_length: usize, missing_total: usize) -> Self {
        self.start_row = start_row;
        self.run_length = run_length;
        self.missing_total = missing_total;
        self
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Blocking
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cells() {
        assert_eq!(Value::parse(""), Value::Missing);
        assert_eq!(Value::parse("   "), Value::Missing);
        assert_eq!(Value::parse("NaN"), Value::Missing);
        assert_eq!(Value::parse("0,5"), Value::Number(0.5));
        assert_eq!(Value::parse(" 12.25 "), Value::Number(12.25));
        assert_eq!(Value::parse("L/min"), Value::Text("L/min".to_string()));
    }

    #[test]
    fn push_column_pads_to_first_length() {
        let mut table = Table::new();
        table.push_column(Column::numeric("a", &[1.0, 2.0, 3.0]));
        table.push_column(Column::numeric("b", &[1.0]));
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.column("b").map(|c| c.missing_count()), Some(2));
    }

    #[test]
    fn retain_and_skip_rows() {
        let mut table = Table::from_columns(vec![Column::numeric("a", &[1.0, 2.0, 3.0, 4.0])]);
        table.retain_rows(|i| i % 2 == 0);
        assert_eq!(table.row_count(), 2);
        table.skip_rows(1);
        assert_eq!(table.column("a").map(|c| c.values.clone()), Some(vec![Value::Number(3.0)]));
    }

    #[test]
    fn window_policies() {
        assert!(FallbackPolicy::Required.bounds_window());
        assert!(FallbackPolicy::Omit.bounds_window());
        assert!(!FallbackPolicy::PreserveMissing.bounds_window());
        assert_eq!(FallbackPolicy::ZeroDefault(0.0).pad_value(), Value::Number(0.0));
    }
}
