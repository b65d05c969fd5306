use tracing::{debug, warn};

use crate::constants::{SAMPLES_PER_SECOND_COLUMN, TRAINRED, TRAINRED_PRIORITY};
use crate::error::{MergeError, Result};
use crate::pipeline::ingestion::reader::{find_header_row, read_table};
use crate::pipeline::ingestion::SourceFile;
use crate::pipeline::processing::detect::{Combine, DetectionRule, HeaderRequirement};
use crate::pipeline::processing::rate::{bucket_by_floor, detect_rate, validate_rate, Aggregation};
use crate::types::{ColumnSpec, FallbackPolicy, RawTable};

use super::base::{LoaderSettings, NormalizedTable, SourceDescriptor, SourceLoader};

const HEADER_KEYWORD: &str = "Timestamp";
/// Nominal sampling rate of the NIRS sensor
const EXPECTED_RATE_HZ: f64 = 10.0;

/// Muscle oxygen sensor sampled at ~10 Hz, bucketed to 1 Hz.
pub struct TrainRedLoader {
    descriptor: SourceDescriptor,
    settings: LoaderSettings,
}

impl TrainRedLoader {
    pub fn new(descriptor: SourceDescriptor, settings: LoaderSettings) -> Self {
        Self { descriptor, settings }
    }

    pub fn default_descriptor() -> Result<SourceDescriptor> {
        Ok(SourceDescriptor {
            name: TRAINRED.to_string(),
            priority: TRAINRED_PRIORITY,
            is_base: false,
            detection: DetectionRule::new(
                &["*trainred*", "session_*.csv"],
                HeaderRequirement::ScanFor(vec!["SmO2".to_string(), "THb".to_string()]),
                Combine::Either,
            )?,
            columns: vec![
                ColumnSpec::new("SmO2", "smo2", FallbackPolicy::Required),
                ColumnSpec::new("THb unfiltered", "THb", FallbackPolicy::Required).with_aliases(&["THb"]),
            ],
            passthrough: false,
        })
    }

    /// First column whose name mentions a timestamp
    fn time_column(raw: &RawTable) -> Option<String> {
        raw.table
            .column_names()
            .into_iter()
            .find(|name| name.to_lowercase().contains("timestamp"))
            .map(String::from)
    }
}

impl SourceLoader for TrainRedLoader {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    fn settings(&self) -> &LoaderSettings {
        &self.settings
    }

    fn parse(&self, file: &SourceFile) -> Result<RawTable> {
        let header_row = find_header_row(
            file.head_lines(self.settings.header_scan_max_lines),
            &[HEADER_KEYWORD],
            self.settings.header_scan_max_lines,
        )
        .ok_or_else(|| MergeError::Parse {
            file: file.file_name.clone(),
            reason: format!(
                "no '{}' header within the first {} lines",
                HEADER_KEYWORD, self.settings.header_scan_max_lines
            ),
        })?;
        debug!(file = %file.file_name, header_row, "Found TrainRed header");

        Ok(RawTable {
            file: file.file_name.clone(),
            table: read_table(&file.contents, header_row, &file.file_name)?,
        })
    }

    fn normalize(&self, raw: RawTable) -> Result<NormalizedTable> {
        let time_column = Self::time_column(&raw).ok_or_else(|| MergeError::Parse {
            file: raw.file.clone(),
            reason: "no timestamp column".to_string(),
        })?;

        let mut issues = Vec::new();
        let detected = detect_rate(&raw.table, &time_column);
        if let Some(issue) = validate_rate(
            &self.descriptor.name,
            &time_column,
            detected,
            EXPECTED_RATE_HZ,
            self.settings.rate_tolerance,
        ) {
            warn!(source = %self.descriptor.name, file = %raw.file, "{}", issue.message);
            issues.push(issue);
        }

        // Always bucket: an irregular export can report a 1 Hz median step
        let table = bucket_by_floor(
            &raw.table,
            &time_column,
            1.0,
            Aggregation::Mean,
            Some(SAMPLES_PER_SECOND_COLUMN),
        )?;
        debug!(
            file = %raw.file,
            input_rows = raw.table.row_count(),
            seconds = table.row_count(),
            "Normalized TrainRed to 1 Hz"
        );

        Ok(NormalizedTable {
            file: raw.file,
            table,
            issues,
        })
    }
}
