use tracing::{debug, warn};

use crate::constants::{GARMIN, GARMIN_MARKER_COLUMN, GARMIN_PRIORITY};
use crate::error::{MergeError, Result};
use crate::pipeline::ingestion::reader::read_table;
use crate::pipeline::ingestion::SourceFile;
use crate::pipeline::processing::detect::{Combine, DetectionRule, HeaderRequirement};
use crate::types::{ColumnSpec, FallbackPolicy, IssueKind, RawTable, Severity, ValidationIssue};

use super::base::{LoaderSettings, LoaderUtils, NormalizedTable, SourceDescriptor, SourceLoader};

/// Auxiliary biometrics from the watch's stream export.
pub struct GarminLoader {
    descriptor: SourceDescriptor,
    settings: LoaderSettings,
}

impl GarminLoader {
    pub fn new(descriptor: SourceDescriptor, settings: LoaderSettings) -> Self {
        Self { descriptor, settings }
    }

    pub fn default_descriptor() -> Result<SourceDescriptor> {
        let targets = ["skin_temperature", "HeatStrainIndex", "core_temperature", GARMIN_MARKER_COLUMN];
        Ok(SourceDescriptor {
            name: GARMIN.to_string(),
            priority: GARMIN_PRIORITY,
            is_base: false,
            detection: DetectionRule::new(
                &["*streams.csv"],
                HeaderRequirement::FirstLineHas(GARMIN_MARKER_COLUMN.to_string()),
                Combine::Both,
            )?,
            columns: targets
                .iter()
                .map(|c| ColumnSpec::new(c, c, FallbackPolicy::Omit))
                .collect(),
            passthrough: false,
        })
    }
}

/// Number of leading rows in which at least one of `columns` is missing.
fn leading_incomplete_rows(table: &crate::types::Table, columns: &[String]) -> usize {
    (0..table.row_count())
        .take_while(|row| {
            columns.iter().any(|name| {
                table
                    .column(name)
                    .map_or(false, |c| c.values[*row].is_missing())
            })
        })
        .count()
}

impl SourceLoader for GarminLoader {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    fn settings(&self) -> &LoaderSettings {
        &self.settings
    }

    fn parse(&self, file: &SourceFile) -> Result<RawTable> {
        Ok(RawTable {
            file: file.file_name.clone(),
            table: read_table(&file.contents, 0, &file.file_name)?,
        })
    }

    fn normalize(&self, raw: RawTable) -> Result<NormalizedTable> {
        let RawTable { file, mut table } = raw;
        let names = LoaderUtils::resolve_names(&self.descriptor, &table);
        let present: Vec<String> = self
            .descriptor
            .columns
            .iter()
            .filter_map(|c| names.get(&c.source).cloned())
            .collect();
        if present.is_empty() {
            return Err(MergeError::ColumnMissing {
                source_name: self.descriptor.name.clone(),
                column: self.descriptor.output_names().join("|"),
                required: false,
                suggestion: None,
            });
        }

        let limit = self.settings.leading_trim_limit;
        let incomplete = leading_incomplete_rows(&table, &present);
        let mut issues = Vec::new();

        if incomplete > limit {
            warn!(
                source = %self.descriptor.name,
                file = %file,
                incomplete,
                limit,
                "Leading incomplete rows exceed the trim limit"
            );
            issues.push(
                ValidationIssue::new(
                    IssueKind::LeadingTrim,
                    Severity::Blocking,
                    &self.descriptor.name,
                    &present.join("|"),
                    format!(
                        "{} leading incomplete rows, only {} may be dropped",
                        incomplete, limit
                    ),
                )
                .with_run(Some(0), incomplete, incomplete),
            );
        }

        let dropped = incomplete.min(limit);
        table.skip_rows(dropped);
        debug!(file = %file, dropped, "Trimmed leading Garmin rows");

        Ok(NormalizedTable { file, table, issues })
    }
}
