use crate::constants::{GARMIN_MARKER_COLUMN, WAHOO, WAHOO_PRIORITY};
use crate::error::Result;
use crate::pipeline::ingestion::reader::read_table;
use crate::pipeline::ingestion::SourceFile;
use crate::pipeline::processing::detect::{Combine, DetectionRule, HeaderRequirement};
use crate::pipeline::processing::quality_gate::validate_timestamps;
use crate::types::{ColumnSpec, FallbackPolicy, RawTable};

use super::base::{LoaderSettings, NormalizedTable, SourceDescriptor, SourceLoader};

pub const TIME_COLUMN: &str = "secs";

/// Base source: the per-second stream export of the head unit.
pub struct WahooLoader {
    descriptor: SourceDescriptor,
    settings: LoaderSettings,
}

impl WahooLoader {
    pub fn new(descriptor: SourceDescriptor, settings: LoaderSettings) -> Self {
        Self { descriptor, settings }
    }

    pub fn default_descriptor() -> Result<SourceDescriptor> {
        Ok(SourceDescriptor {
            name: WAHOO.to_string(),
            priority: WAHOO_PRIORITY,
            is_base: true,
            detection: DetectionRule::new(
                &["*streams.csv"],
                HeaderRequirement::FirstLineLacks(GARMIN_MARKER_COLUMN.to_string()),
                Combine::Both,
            )?,
            // Everything else (watts, cadence, heartrate, ...) passes through
            columns: vec![ColumnSpec::new(TIME_COLUMN, TIME_COLUMN, FallbackPolicy::Required)],
            passthrough: true,
        })
    }
}

impl SourceLoader for WahooLoader {
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
        let issues = validate_timestamps(&raw.table, &self.descriptor.name, TIME_COLUMN);
        Ok(NormalizedTable {
            file: raw.file,
            table: raw.table,
            issues,
        })
    }
}
