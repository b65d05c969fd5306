use crate::error::{MergeError, Result};
use crate::types::{Column, Table, Value};

/// True when `field` is `keyword`, or starts with it followed by a
/// non-alphanumeric character (`THb unfiltered`, `Timestamp (s)`).
/// Case-insensitive.
pub fn field_matches(field: &str, keyword: &str) -> bool {
    let field = field.trim().to_lowercase();
    let keyword = keyword.to_lowercase();
    match field.strip_prefix(&keyword) {
        Some(rest) => rest.chars().next().map_or(true, |c| !c.is_alphanumeric()),
        None => false,
    }
}

/// Split a header line into trimmed field names.
pub fn split_header(line: &str) -> Vec<String> {
    let delimiter = sniff_delimiter(line);
    line.split(delimiter as char)
        .map(|f| f.trim().trim_matches('"').trim().to_string())
        .collect()
}

/// Index of the first line (within `max_lines`) whose fields match every keyword.
pub fn find_header_row<'a, I>(lines: I, keywords: &[&str], max_lines: usize) -> Option<usize>
where
    I: IntoIterator<Item = &'a str>,
{
    lines.into_iter().take(max_lines).position(|line| {
        let fields = split_header(line);
        keywords
            .iter()
            .all(|kw| fields.iter().any(|f| field_matches(f, kw)))
    })
}

/// Comma unless the line clearly uses semicolons or tabs.
fn sniff_delimiter(line: &str) -> u8 {
    let commas = line.matches(',').count();
    let semicolons = line.matches(';').count();
    let tabs = line.matches('\t').count();
    if semicolons > commas && semicolons >= tabs {
        b';'
    } else if tabs > commas {
        b'\t'
    } else {
        b','
    }
}

/// Parse CSV text into a table, taking line `header_row` as the header.
/// Lines before it are ignored. Short records are padded with missing
/// cells and surplus fields are dropped.
pub fn read_table(contents: &str, header_row: usize, file: &str) -> Result<Table> {
    let body: String = contents
        .lines()
        .skip(header_row)
        .collect::<Vec<_>>()
        .join("\n");

    let header_line = body.lines().next().unwrap_or("");
    if header_line.trim().is_empty() {
        return Err(MergeError::Parse {
            file: file.to_string(),
            reason: format!("no header found at line {}", header_row + 1),
        });
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(sniff_delimiter(header_line))
        .from_reader(body.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| parse_error(file, e))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut values: Vec<Vec<Value>> = vec![Vec::new(); headers.len()];
    for record in reader.records() {
        let record = record.map_err(|e| parse_error(file, e))?;
        for (idx, column) in values.iter_mut().enumerate() {
            column.push(record.get(idx).map(Value::parse).unwrap_or(Value::Missing));
        }
    }

    let mut table = Table::new();
    for (name, column) in headers.into_iter().zip(values) {
        if name.is_empty() || table.has_column(&name) {
            continue;
        }
        table.push_column(Column::new(name, column));
    }
    Ok(table)
}

fn parse_error(file: &str, err: csv::Error) -> MergeError {
    MergeError::Parse {
        file: file.to_string(),
        reason: err.to_string(),
    }
}
