use tracing::{debug, warn};

use crate::constants::{TYMEWEAR, TYMEWEAR_PRIORITY};
use crate::error::{MergeError, Result};
use crate::pipeline::ingestion::reader::{find_header_row, read_table};
use crate::pipeline::ingestion::SourceFile;
use crate::pipeline::processing::detect::{Combine, DetectionRule, HeaderRequirement};
use crate::types::{ColumnSpec, FallbackPolicy, IssueKind, RawTable, ValidationIssue, Value};

use super::base::{LoaderSettings, LoaderUtils, NormalizedTable, SourceDescriptor, SourceLoader};

const BREATH_RATE: &str = "BR";
const TIDAL_VOLUME: &str = "VT";
const VENTILATION: &str = "VE";

/// Ventilation sensor export, 1 Hz, with a units row under the header.
pub struct TymewearLoader {
    descriptor: SourceDescriptor,
    settings: LoaderSettings,
}

impl TymewearLoader {
    pub fn new(descriptor: SourceDescriptor, settings: LoaderSettings) -> Self {
        Self { descriptor, settings }
    }

    pub fn default_descriptor() -> Result<SourceDescriptor> {
        Ok(SourceDescriptor {
            name: TYMEWEAR.to_string(),
            priority: TYMEWEAR_PRIORITY,
            is_base: false,
            detection: DetectionRule::new(
                &[],
                HeaderRequirement::ScanFor(vec![
                    BREATH_RATE.to_string(),
                    TIDAL_VOLUME.to_string(),
                    VENTILATION.to_string(),
                ]),
                Combine::Both,
            )?,
            columns: vec![
                ColumnSpec::new(BREATH_RATE, "TymeBreathRate", FallbackPolicy::Required),
                ColumnSpec::new(TIDAL_VOLUME, "tidal_volume", FallbackPolicy::Required),
                ColumnSpec::new(VENTILATION, "TymeVentilation", FallbackPolicy::Required),
            ],
            passthrough: false,
        })
    }

    fn header_keywords(&self) -> Vec<&str> {
        self.descriptor.columns.iter().map(|c| c.source.as_str()).collect()
    }
}

impl SourceLoader for TymewearLoader {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    fn settings(&self) -> &LoaderSettings {
        &self.settings
    }

    fn parse(&self, file: &SourceFile) -> Result<RawTable> {
        let max_lines = self.settings.header_scan_max_lines;
        let header_row = find_header_row(file.head_lines(max_lines), &self.header_keywords(), max_lines)
            .ok_or_else(|| MergeError::Parse {
                file: file.file_name.clone(),
                reason: format!("no BR/VT/VE header within the first {} lines", max_lines),
            })?;

        Ok(RawTable {
            file: file.file_name.clone(),
            table: read_table(&file.contents, header_row, &file.file_name)?,
        })
    }

    fn normalize(&self, raw: RawTable) -> Result<NormalizedTable> {
        let RawTable { file, mut table } = raw;
        let names = LoaderUtils::resolve_names(&self.descriptor, &table);
        let targets: Vec<String> = self
            .descriptor
            .columns
            .iter()
            .filter_map(|c| names.get(&c.source).cloned())
            .collect();

        // Units legend directly under the header carries no numbers
        let legend = table.row_count() > 0
            && targets.iter().all(|name| {
                table
                    .column(name)
                    .map_or(true, |c| c.values[0].as_f64().is_none())
            });
        if legend {
            table.skip_rows(1);
        }

        // Rows with none of the target values are dropped
        let before = table.row_count();
        let keep: Vec<bool> = (0..before)
            .map(|row| {
                targets.iter().any(|name| {
                    table
                        .column(name)
                        .map_or(false, |c| !c.values[row].is_missing())
                })
            })
            .collect();
        table.retain_rows(|row| keep[row]);
        let rows = table.row_count();
        debug!(file = %file, legend, dropped = before - rows, "Cleaned Tymewear rows");

        let mut issues = Vec::new();
        for name in &targets {
            let Some(column) = table.column_mut(name) else {
                continue;
            };
            let invalid = column
                .values
                .iter()
                .filter(|v| matches!(v, Value::Text(_)))
                .count();
            if invalid > 0 {
                let fraction = invalid as f64 / rows.max(1) as f64;
                if fraction > self.settings.max_invalid_fraction {
                    return Err(MergeError::Parse {
                        file,
                        reason: format!(
                            "column '{}' has {} non-numeric values ({:.1}% of rows)",
                            name,
                            invalid,
                            fraction * 100.0
                        ),
                    });
                }
                warn!(source = %self.descriptor.name, column = %name, invalid, "Coerced non-numeric values to missing");
                issues.push(
                    ValidationIssue::warning(
                        IssueKind::InvalidValues,
                        &self.descriptor.name,
                        name,
                        format!("{} non-numeric values treated as missing", invalid),
                    )
                    .with_run(None, invalid, invalid),
                );
            }

            let integer = names.get(BREATH_RATE).map_or(false, |br| br == name);
            for value in column.values.iter_mut() {
                *value = match value {
                    Value::Number(n) if integer => Value::Number(n.round()),
                    Value::Number(n) => Value::Number(*n),
                    _ => Value::Missing,
                };
            }
        }

        Ok(NormalizedTable { file, table, issues })
    }
}
