use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::constants::*;
use crate::error::{MergeError, Result};
use crate::types::FallbackPolicy;

/// Run configuration. Every field has a default so a config file only
/// needs to mention what it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Longest tolerated run of consecutive missing values per column
    pub gap_threshold: usize,
    /// Minimum normalized similarity for a column-name suggestion
    pub similarity_threshold: f64,
    pub header_scan_max_lines: usize,
    pub max_workers: usize,
    /// Maximum leading rows the auxiliary loader may drop
    pub leading_trim_limit: usize,
    /// Share of uncoercible cells that turns into a parse error
    pub max_invalid_fraction: f64,
    pub rate_tolerance: f64,
    pub allow_gaps: bool,
    pub dry_run: bool,
    pub sources: Vec<SourceOverride>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from(DEFAULT_INPUT_DIR),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            gap_threshold: DEFAULT_GAP_THRESHOLD,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            header_scan_max_lines: DEFAULT_HEADER_SCAN_MAX_LINES,
            max_workers: DEFAULT_MAX_WORKERS,
            leading_trim_limit: DEFAULT_LEADING_TRIM_LIMIT,
            max_invalid_fraction: DEFAULT_MAX_INVALID_FRACTION,
            rate_tolerance: DEFAULT_RATE_TOLERANCE,
            allow_gaps: false,
            dry_run: false,
            sources: Vec::new(),
        }
    }
}

/// Column mapping overrides for one registered source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceOverride {
    pub name: String,
    #[serde(default)]
    pub priority: Option<i32>,
    /// Filename globs replacing the built-in ones
    #[serde(default)]
    pub patterns: Option<Vec<String>>,
    #[serde(default)]
    pub columns: Vec<ColumnOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnOverride {
    pub source: String,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub fallback: Option<FallbackKind>,
    #[serde(default)]
    pub fallback_value: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackKind {
    Required,
    ZeroDefault,
    PreserveMissing,
    Omit,
}

impl ColumnOverride {
    pub fn policy(&self) -> Option<FallbackPolicy> {
        self.fallback.map(|kind| match kind {
            FallbackKind::Required => FallbackPolicy::Required,
            FallbackKind::ZeroDefault => FallbackPolicy::ZeroDefault(self.fallback_value.unwrap_or(0.0)),
            FallbackKind::PreserveMissing => FallbackPolicy::PreserveMissing,
            FallbackKind::Omit => FallbackPolicy::Omit,
        })
    }
}

impl MergeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            MergeError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: MergeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `INTERVALS_*` environment variables (and `.env`).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let config = Self::default().with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(dir) = std::env::var("INTERVALS_INPUT_DIR") {
            self.input_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("INTERVALS_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("INTERVALS_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        if let Some(v) = env_parse("INTERVALS_GAP_THRESHOLD")? {
            self.gap_threshold = v;
        }
        if let Some(v) = env_parse("INTERVALS_MAX_WORKERS")? {
            self.max_workers = v;
        }
        if let Some(v) = env_parse("INTERVALS_ALLOW_GAPS")? {
            self.allow_gaps = v;
        }
        if let Some(v) = env_parse("INTERVALS_DRY_RUN")? {
            self.dry_run = v;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(MergeError::Config("max_workers must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(MergeError::Config(format!(
                "similarity_threshold must be within 0..=1, got {}",
                self.similarity_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.max_invalid_fraction) {
            return Err(MergeError::Config(format!(
                "max_invalid_fraction must be within 0..=1, got {}",
                self.max_invalid_fraction
            )));
        }
        if self.rate_tolerance < 0.0 {
            return Err(MergeError::Config("rate_tolerance must not be negative".to_string()));
        }
        for column in self.sources.iter().flat_map(|s| s.columns.iter()) {
            if column.fallback_value.is_some() && column.fallback != Some(FallbackKind::ZeroDefault) {
                return Err(MergeError::Config(format!(
                    "fallback_value on column '{}' requires fallback = \"zero_default\"",
                    column.source
                )));
            }
        }
        Ok(())
    }

    pub fn source_override(&self, name: &str) -> Option<&SourceOverride> {
        self.sources.iter().find(|s| s.name == name)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| MergeError::Config(format!("Invalid value for {}: '{}'", key, raw))),
        Err(_) => Ok(None),
    }
}
