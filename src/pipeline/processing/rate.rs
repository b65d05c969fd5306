use std::collections::BTreeMap;

use tracing::debug;

use crate::constants::SECOND_COLUMN;
use crate::error::{MergeError, Result};
use crate::types::{Column, IssueKind, Table, ValidationIssue, Value};

/// How samples inside one resampling bucket are combined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Mean,
    First,
    Last,
    Median,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillMethod {
    Linear,
    ForwardFill,
    BackFill,
    /// Same as forward fill
    Pad,
    None,
}

/// Sampling frequency in Hz from the median of positive successive
/// deltas. Falls back to 1.0 when fewer than two usable samples exist.
pub fn detect_rate(table: &Table, time_column: &str) -> f64 {
    let Some(column) = table.column(time_column) else {
        return 1.0;
    };
    let times: Vec<f64> = column.values.iter().filter_map(Value::as_f64).collect();
    let mut deltas: Vec<f64> = times
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|d| *d > 0.0)
        .collect();

    match median(&mut deltas) {
        Some(step) if step > 0.0 => 1.0 / step,
        _ => 1.0,
    }
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

fn same_rate(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * b.abs().max(1.0)
}

/// Resample to `target` Hz with [`bucket_by_floor`]. Data whose detected
/// rate already equals `target` is returned unchanged.
pub fn resample(
    table: &Table,
    time_column: &str,
    target: f64,
    aggregation: Aggregation,
    count_column: Option<&str>,
) -> Result<Table> {
    let detected = detect_rate(table, time_column);
    if target > 0.0 && table.has_column(time_column) && same_rate(detected, target) {
        debug!(time_column, target, "Already at target frequency");
        return Ok(table.clone());
    }
    bucket_by_floor(table, time_column, target, aggregation, count_column)
}

/// Bucket rows by `floor(t * target)` and aggregate each bucket, whatever
/// the detected rate.
///
/// The output starts with a `second` column holding each bucket's start
/// time, followed by the input columns in their original order.
/// Numeric columns use `aggregation`; text columns take the first
/// populated value. Rows with no usable timestamp are dropped. When
/// `count_column` is given, the number of samples per bucket is appended.
pub fn bucket_by_floor(
    table: &Table,
    time_column: &str,
    target: f64,
    aggregation: Aggregation,
    count_column: Option<&str>,
) -> Result<Table> {
    if target <= 0.0 {
        return Err(MergeError::Config(format!("target frequency must be positive, got {}", target)));
    }
    let time = table
        .column(time_column)
        .ok_or_else(|| MergeError::Config(format!("time column '{}' not found", time_column)))?;

    let mut buckets: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (row, value) in time.values.iter().enumerate() {
        if let Some(t) = value.as_f64() {
            let key = (t * target + 1e-9).floor() as i64;
            buckets.entry(key).or_default().push(row);
        }
    }

    let mut out = Table::new();
    out.push_column(Column::new(
        SECOND_COLUMN,
        buckets.keys().map(|k| Value::Number(*k as f64 / target)).collect(),
    ));

    for column in table.columns() {
        if column.name == SECOND_COLUMN {
            continue;
        }
        let numeric = column.is_numeric();
        let values = buckets
            .values()
            .map(|rows| {
                let cells: Vec<&Value> = rows.iter().map(|r| &column.values[*r]).collect();
                if numeric {
                    aggregate(&cells, aggregation)
                } else {
                    cells
                        .iter()
                        .find(|v| !v.is_missing())
                        .map(|v| (*v).clone())
                        .unwrap_or(Value::Missing)
                }
            })
            .collect();
        out.push_column(Column::new(column.name.clone(), values));
    }

    if let Some(name) = count_column {
        out.push_column(Column::new(
            name,
            buckets.values().map(|rows| Value::Number(rows.len() as f64)).collect(),
        ));
    }

    debug!(
        input_rows = table.row_count(),
        output_rows = out.row_count(),
        target,
        "Resampled table"
    );
    Ok(out)
}

fn aggregate(cells: &[&Value], aggregation: Aggregation) -> Value {
    let mut numbers: Vec<f64> = cells.iter().filter_map(|v| v.as_f64()).collect();
    if numbers.is_empty() {
        return Value::Missing;
    }
    let result = match aggregation {
        Aggregation::Mean => numbers.iter().sum::<f64>() / numbers.len() as f64,
        Aggregation::First => numbers[0],
        Aggregation::Last => numbers[numbers.len() - 1],
        Aggregation::Median => match median(&mut numbers) {
            Some(m) => m,
            None => return Value::Missing,
        },
    };
    Value::from_f64(result)
}

/// Fill interior runs of at most `max_gap` missing cells. Leading and
/// trailing runs are left alone. Linear filling only touches numeric
/// columns. Returns the number of filled cells.
pub fn fill_gaps(table: &mut Table, method: FillMethod, max_gap: usize) -> usize {
    if method == FillMethod::None || max_gap == 0 {
        return 0;
    }
    let mut filled = 0;

    for column in table.column_names().into_iter().map(String::from).collect::<Vec<_>>() {
        let Some(column) = table.column_mut(&column) else {
            continue;
        };
        if method == FillMethod::Linear && !column.is_numeric() {
            continue;
        }
        filled += fill_column(&mut column.values, method, max_gap);
    }
    filled
}

fn fill_column(values: &mut [Value], method: FillMethod, max_gap: usize) -> usize {
    let mut filled = 0;
    let mut idx = 0;

    while idx < values.len() {
        if !values[idx].is_missing() {
            idx += 1;
            continue;
        }
        let start = idx;
        while idx < values.len() && values[idx].is_missing() {
            idx += 1;
        }
        let end = idx; // exclusive

        let interior = start > 0 && end < values.len();
        if !interior || end - start > max_gap {
            continue;
        }

        let before = values[start - 1].clone();
        let after = values[end].clone();
        for (offset, slot) in values[start..end].iter_mut().enumerate() {
            *slot = match method {
                FillMethod::ForwardFill | FillMethod::Pad => before.clone(),
                FillMethod::BackFill => after.clone(),
                FillMethod::Linear => match (before.as_f64(), after.as_f64()) {
                    (Some(a), Some(b)) => {
                        let step = (b - a) / (end - start + 1) as f64;
                        Value::Number(a + step * (offset + 1) as f64)
                    }
                    _ => continue,
                },
                FillMethod::None => continue,
            };
            filled += 1;
        }
    }
    filled
}

/// Warning when `detected` deviates from `expected` by more than `tolerance` (relative).
pub fn validate_rate(source: &str, column: &str, detected: f64, expected: f64, tolerance: f64) -> Option<ValidationIssue> {
    if expected <= 0.0 {
        return None;
    }
    let deviation = (detected - expected).abs() / expected;
    if deviation <= tolerance {
        return None;
    }
    Some(ValidationIssue::warning(
        IssueKind::SamplingRate,
        source,
        column,
        format!(
            "detected {:.2} Hz, expected {:.2} Hz (±{:.0}%)",
            detected,
            expected,
            tolerance * 100.0
        ),
    ))
}
