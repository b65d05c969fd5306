//! Integrity checks run on every extracted table before the merge.
//!
//! Missing-value runs are classified against a gap threshold: runs up to the
//! threshold are warnings, longer runs block the merge unless gaps are
//! explicitly allowed.

pub mod columns;

use tracing::debug;

use crate::types::{IssueKind, Severity, Table, ValidationIssue, Value};

pub use columns::{calculate_similarity, find_column, suggest_column, validate_columns};

/// Configuration for integrity validation
#[derive(Debug, Clone)]
pub struct IntegrityConfig {
    /// Longest run of consecutive missing values still treated as a warning
    pub gap_threshold: usize,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            gap_threshold: crate::constants::DEFAULT_GAP_THRESHOLD,
        }
    }
}

/// Default integrity validator
#[derive(Debug, Clone, Default)]
pub struct IntegrityValidator {
    pub config: IntegrityConfig,
}

impl IntegrityValidator {
    pub fn new(gap_threshold: usize) -> Self {
        Self {
            config: IntegrityConfig { gap_threshold },
        }
    }

    pub fn validate(&self, table: &Table, label: &str) -> Vec<ValidationIssue> {
        validate(table, label, self.config.gap_threshold)
    }
}

/// Longest run of missing cells as `(start_row, length)`.
pub fn longest_missing_run(values: &[Value]) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;
    let mut run_start = 0;
    let mut run_len = 0;

    for (idx, value) in values.iter().enumerate() {
        if value.is_missing() {
            if run_len == 0 {
                run_start = idx;
            }
            run_len += 1;
            if best.map_or(true, |(_, len)| run_len > len) {
                best = Some((run_start, run_len));
            }
        } else {
            run_len = 0;
        }
    }
    best
}

/// One issue per column that has missing values.
pub fn validate(table: &Table, label: &str, gap_threshold: usize) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    for column in table.columns() {
        let total = column.missing_count();
        if total == 0 {
            continue;
        }

        // Fewer missing cells than the threshold cannot form a blocking run
        if total < gap_threshold {
            issues.push(
                ValidationIssue::warning(
                    IssueKind::Gap,
                    label,
                    &column.name,
                    format!("{} missing values", total),
                )
                .with_run(None, total, total),
            );
            continue;
        }

        let Some((start, run)) = longest_missing_run(&column.values) else {
            continue;
        };
        let severity = if run > gap_threshold {
            Severity::Blocking
        } else {
            Severity::Warning
        };
        debug!(source = label, column = %column.name, start, run, %severity, "Missing-value run");

        issues.push(
            ValidationIssue::new(
                IssueKind::Gap,
                severity,
                label,
                &column.name,
                format!(
                    "{} consecutive missing values starting at row {} ({} missing in total)",
                    run, start, total
                ),
            )
            .with_run(Some(start), run, total),
        );
    }

    issues
}

/// Warnings for negative, decreasing and duplicate elapsed-time values.
pub fn validate_timestamps(table: &Table, label: &str, time_column: &str) -> Vec<ValidationIssue> {
    let Some(column) = table.column(time_column) else {
        return Vec::new();
    };
    let times: Vec<f64> = column.values.iter().filter_map(Value::as_f64).collect();

    let negative = times.iter().filter(|t| **t < 0.0).count();
    let decreasing = times.windows(2).filter(|w| w[1] < w[0]).count();
    let duplicates = times.windows(2).filter(|w| w[1] == w[0]).count();

    let mut issues = Vec::new();
    let mut push = |count: usize, what: &str| {
        if count > 0 {
            issues.push(
                ValidationIssue::warning(
                    IssueKind::Timestamp,
                    label,
                    time_column,
                    format!("{} {} timestamp values", count, what),
                )
                .with_run(None, count, count),
            );
        }
    };
    push(negative, "negative");
    push(decreasing, "decreasing");
    push(duplicates, "duplicate");
    issues
}
