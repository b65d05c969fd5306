use std::collections::HashSet;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{MergeError, Result};
use crate::types::{Column, ExtractedTable, FallbackPolicy, IssueKind, Table, ValidationIssue, Value};

/// What one input file contributed to the merge.
#[derive(Debug, Clone, Serialize)]
pub struct SourceContribution {
    pub source: String,
    pub file: String,
    /// SHA-256 of the input bytes
    pub digest: String,
    pub rows: usize,
    pub columns: Vec<String>,
}

/// The merged table and everything learned while producing it.
#[derive(Debug, Clone)]
pub struct MergeResult {
    pub run_id: Uuid,
    pub table: Table,
    pub row_count: usize,
    pub column_count: usize,
    /// Rows removed from the tail to reach the common valid window
    pub rows_trimmed: usize,
    pub issues: Vec<ValidationIssue>,
    pub contributions: Vec<SourceContribution>,
    pub output_path: Option<PathBuf>,
    /// Writes performed or, in dry-run mode, skipped
    pub operations: Vec<String>,
}

/// Index of the last row in which every named column is populated.
/// With no window columns every row qualifies.
pub fn last_complete_row(table: &Table, columns: &[&str]) -> Option<usize> {
    let window: Vec<&Column> = columns.iter().filter_map(|name| table.column(name)).collect();
    (0..table.row_count())
        .rev()
        .find(|row| window.iter().all(|c| !c.values[*row].is_missing()))
}

/// Positional column-wise merge anchored to the base table
#[derive(Debug, Default)]
pub struct MergeEngine;

impl MergeEngine {
    pub fn new() -> Self {
        Self
    }

    /// Merge `sources` onto `base` by row index.
    ///
    /// Row count comes from the base; longer sources are truncated and
    /// shorter ones padded according to their fallback policy. The result
    /// is then trimmed after the last row where every window column
    /// (policy `Required` or `Omit`) is populated.
    pub fn merge(&self, base: &ExtractedTable, sources: &[ExtractedTable]) -> Result<MergeResult> {
        let rows = base.table.row_count();
        let mut issues = Vec::new();
        let mut names: HashSet<String> = HashSet::new();
        let mut merged: Vec<(Column, FallbackPolicy)> = Vec::new();

        for column in base.table.columns() {
            names.insert(column.name.clone());
            merged.push((column.clone(), base.policy(&column.name)));
        }

        let mut ordered: Vec<&ExtractedTable> = sources.iter().collect();
        ordered.sort_by_key(|s| s.priority);

        for source in ordered {
            let source_rows = source.table.row_count();
            if source_rows > rows {
                debug!(source = %source.source, source_rows, rows, "Truncating longer source");
            }

            for column in source.table.columns() {
                if !names.insert(column.name.clone()) {
                    warn!(source = %source.source, column = %column.name, "Duplicate column, keeping the earlier one");
                    issues.push(ValidationIssue::warning(
                        IssueKind::DuplicateColumn,
                        &source.source,
                        &column.name,
                        format!("column '{}' already provided, keeping the base/earlier value", column.name),
                    ));
                    continue;
                }

                let policy = source.policy(&column.name);
                let mut values: Vec<Value> = column.values.iter().take(rows).cloned().collect();
                values.resize(rows, policy.pad_value());
                merged.push((Column::new(column.name.clone(), values), policy));
            }
        }

        let window: Vec<String> = merged
            .iter()
            .filter(|(_, policy)| policy.bounds_window())
            .map(|(c, _)| c.name.clone())
            .collect();
        let mut table = Table::from_columns(merged.into_iter().map(|(c, _)| c).collect());

        let window_refs: Vec<&str> = window.iter().map(|s| s.as_str()).collect();
        let last = last_complete_row(&table, &window_refs).ok_or(MergeError::EmptyResult)?;
        let keep = last + 1;
        let rows_trimmed = rows - keep;
        table.truncate(keep);

        info!(
            rows = keep,
            columns = table.column_count(),
            rows_trimmed,
            "Merged sources"
        );

        Ok(MergeResult {
            run_id: Uuid::new_v4(),
            row_count: table.row_count(),
            column_count: table.column_count(),
            table,
            rows_trimmed,
            issues,
            contributions: Vec::new(),
            output_path: None,
            operations: Vec::new(),
        })
    }
}
