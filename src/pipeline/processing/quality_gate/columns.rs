use crate::error::{MergeError, Result};
use crate::types::{ColumnSpec, Table};

/// Normalized Levenshtein similarity in `0.0..=1.0`, compared case-insensitively.
pub fn calculate_similarity(s1: &str, s2: &str) -> f64 {
    let s1 = s1.trim().to_lowercase();
    let s2 = s2.trim().to_lowercase();
    if s1 == s2 {
        return 1.0;
    }

    let len1 = s1.chars().count();
    let len2 = s2.chars().count();
    if len1 == 0 || len2 == 0 {
        return 0.0;
    }

    let max_len = len1.max(len2);
    1.0 - (levenshtein_distance(&s1, &s2) as f64 / max_len as f64)
}

fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let chars1: Vec<char> = s1.chars().collect();
    let chars2: Vec<char> = s2.chars().collect();

    // Two rolling rows instead of the full matrix
    let mut prev: Vec<usize> = (0..=chars2.len()).collect();
    let mut curr = vec![0; chars2.len() + 1];

    for i in 1..=chars1.len() {
        curr[0] = i;
        for j in 1..=chars2.len() {
            let cost = if chars1[i - 1] == chars2[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[chars2.len()]
}

/// The closest available column name at or above `threshold`.
pub fn suggest_column<'a, I>(target: &str, available: I, threshold: f64) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    available
        .into_iter()
        .map(|name| (name, calculate_similarity(target, name)))
        .filter(|(_, score)| *score >= threshold)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(name, _)| name.to_string())
}

/// Resolve `wanted` against the table: exact name first, then a
/// case-insensitive trimmed match.
pub fn find_column<'a>(table: &'a Table, wanted: &str) -> Option<&'a str> {
    if let Some(column) = table.column(wanted) {
        return Some(column.name.as_str());
    }
    let wanted = wanted.trim().to_lowercase();
    table
        .column_names()
        .into_iter()
        .find(|name| name.trim().to_lowercase() == wanted)
}

/// Fails with the first required column that resolves under none of its
/// names. The suggestion is the closest actual column to the declared name.
pub fn validate_columns(table: &Table, source: &str, required: &[&ColumnSpec], threshold: f64) -> Result<()> {
    for spec in required {
        if spec.candidates().all(|name| find_column(table, name).is_none()) {
            return Err(MergeError::ColumnMissing {
                source_name: source.to_string(),
                column: spec.source.clone(),
                required: true,
                suggestion: suggest_column(&spec.source, table.column_names(), threshold),
            });
        }
    }
    Ok(())
}
