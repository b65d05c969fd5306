use std::collections::HashMap;

use tracing::{debug, warn};

use crate::config::MergeConfig;
use crate::error::Result;
use crate::pipeline::ingestion::SourceFile;
use crate::pipeline::processing::detect::DetectionRule;
use crate::pipeline::processing::quality_gate::{find_column, suggest_column, validate_columns};
use crate::types::{Column, ColumnSpec, ExtractedTable, FallbackPolicy, IssueKind, RawTable, Table, ValidationIssue};

/// Static description of one input source.
#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    pub name: String,
    /// Lower loads first and wins ambiguous detections
    pub priority: i32,
    /// The base source supplies the authoritative row index
    pub is_base: bool,
    pub detection: DetectionRule,
    pub columns: Vec<ColumnSpec>,
    /// Keep undeclared input columns unchanged
    pub passthrough: bool,
}

impl SourceDescriptor {
    pub fn output_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.output.as_str()).collect()
    }

    pub fn required_columns(&self) -> Vec<&ColumnSpec> {
        self.columns
            .iter()
            .filter(|c| c.fallback == FallbackPolicy::Required)
            .collect()
    }
}

/// Loader tuning shared by all variants.
#[derive(Debug, Clone)]
pub struct LoaderSettings {
    pub header_scan_max_lines: usize,
    pub leading_trim_limit: usize,
    pub max_invalid_fraction: f64,
    pub similarity_threshold: f64,
    pub rate_tolerance: f64,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self::from(&MergeConfig::default())
    }
}

impl From<&MergeConfig> for LoaderSettings {
    fn from(config: &MergeConfig) -> Self {
        Self {
            header_scan_max_lines: config.header_scan_max_lines,
            leading_trim_limit: config.leading_trim_limit,
            max_invalid_fraction: config.max_invalid_fraction,
            similarity_threshold: config.similarity_threshold,
            rate_tolerance: config.rate_tolerance,
        }
    }
}

/// A table after source-specific normalization, with the issues raised
/// while producing it.
#[derive(Debug, Clone)]
pub struct NormalizedTable {
    pub file: String,
    pub table: Table,
    pub issues: Vec<ValidationIssue>,
}

impl From<RawTable> for NormalizedTable {
    fn from(raw: RawTable) -> Self {
        Self {
            file: raw.file,
            table: raw.table,
            issues: Vec::new(),
        }
    }
}

/// Base trait for source-specific loaders
pub trait SourceLoader: Send + Sync {
    fn descriptor(&self) -> &SourceDescriptor;

    fn settings(&self) -> &LoaderSettings;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Whether this loader claims the file
    fn detect(&self, file: &SourceFile) -> bool {
        self.descriptor()
            .detection
            .matches(file, self.settings().header_scan_max_lines)
    }

    /// Read the file into a raw table
    fn parse(&self, file: &SourceFile) -> Result<RawTable>;

    /// Source-specific cleanup. Identity for 1 Hz sources.
    fn normalize(&self, raw: RawTable) -> Result<NormalizedTable> {
        Ok(raw.into())
    }

    /// Project to output column names and apply fallbacks
    fn extract(&self, table: NormalizedTable) -> Result<ExtractedTable> {
        LoaderUtils::project(self.descriptor(), table, self.settings().similarity_threshold)
    }

    /// parse, normalize and extract in one go
    fn load(&self, file: &SourceFile) -> Result<ExtractedTable> {
        let raw = self.parse(file)?;
        let normalized = self.normalize(raw)?;
        self.extract(normalized)
    }
}

/// Helpers shared by loader implementations
pub struct LoaderUtils;

impl LoaderUtils {
    /// Project a normalized table onto the descriptor's output columns.
    ///
    /// Passthrough descriptors keep every input column in input order and
    /// only rename declared ones. Otherwise only declared columns survive,
    /// in declaration order.
    pub fn project(
        descriptor: &SourceDescriptor,
        normalized: NormalizedTable,
        similarity_threshold: f64,
    ) -> Result<ExtractedTable> {
        let NormalizedTable { file, mut table, mut issues } = normalized;
        validate_columns(&table, &descriptor.name, &descriptor.required_columns(), similarity_threshold)?;

        let rows = table.row_count();
        let mut policies = HashMap::new();
        let mut resolved: Vec<(Option<String>, &ColumnSpec)> = Vec::with_capacity(descriptor.columns.len());

        for spec in &descriptor.columns {
            let found = spec
                .candidates()
                .find_map(|c| find_column(&table, c))
                .map(String::from);
            if found.is_none() {
                let suggestion = suggest_column(&spec.source, table.column_names(), similarity_threshold);
                let hint = suggestion
                    .map(|s| format!(", closest match '{}'", s))
                    .unwrap_or_default();
                warn!(source = %descriptor.name, column = %spec.source, file = %file, "Optional column missing{}", hint);
                issues.push(ValidationIssue::warning(
                    IssueKind::MissingColumn,
                    &descriptor.name,
                    &spec.output,
                    format!("column '{}' not found in {}{}", spec.source, file, hint),
                ));
            }
            resolved.push((found, spec));
        }

        let mut out = Table::new();
        if descriptor.passthrough {
            for column in table.columns() {
                let spec = resolved
                    .iter()
                    .find(|(found, _)| found.as_deref() == Some(column.name.as_str()))
                    .map(|(_, spec)| *spec);
                let (name, policy) = match spec {
                    Some(spec) => (spec.output.clone(), spec.fallback),
                    None => (column.name.clone(), FallbackPolicy::PreserveMissing),
                };
                policies.insert(name.clone(), policy);
                out.push_column(Column::new(name, column.values.clone()));
            }
        }

        for (found, spec) in &resolved {
            match found {
                Some(name) if !descriptor.passthrough => {
                    if let Some(mut column) = table.remove_column(name) {
                        column.name = spec.output.clone();
                        out.push_column(column);
                        policies.insert(spec.output.clone(), spec.fallback);
                    }
                }
                Some(_) => {}
                None => match spec.fallback {
                    FallbackPolicy::ZeroDefault(_) | FallbackPolicy::PreserveMissing => {
                        out.push_column(Column::new(spec.output.clone(), vec![spec.fallback.pad_value(); rows]));
                        policies.insert(spec.output.clone(), spec.fallback);
                    }
                    FallbackPolicy::Omit | FallbackPolicy::Required => {}
                },
            }
        }

        debug!(
            source = %descriptor.name,
            columns = out.column_count(),
            rows = out.row_count(),
            "Extracted table"
        );

        Ok(ExtractedTable {
            source: descriptor.name.clone(),
            priority: descriptor.priority,
            table: out,
            policies,
            issues,
        })
    }

    /// Resolve the declared columns' actual names in `table`, keyed by
    /// the declared source name.
    pub fn resolve_names(descriptor: &SourceDescriptor, table: &Table) -> HashMap<String, String> {
        descriptor
            .columns
            .iter()
            .filter_map(|spec| {
                spec.candidates()
                    .find_map(|c| find_column(table, c))
                    .map(|actual| (spec.source.clone(), actual.to_string()))
            })
            .collect()
    }
}
