use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{Local, NaiveDate};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use crate::config::MergeConfig;
use crate::error::{MergeError, Result};
use crate::observability::metrics;
use crate::pipeline::ingestion::{self, SourceFile};
use crate::pipeline::processing::loaders::SourceLoader;
use crate::pipeline::processing::merge::{MergeEngine, MergeResult, SourceContribution};
use crate::pipeline::processing::quality_gate::IntegrityValidator;
use crate::pipeline::processing::registry::LoaderRegistry;
use crate::storage::{output_file_name, CsvFileWriter, OutputWriter};
use crate::types::{Column, ExtractedTable, FallbackPolicy, IssueKind, Severity, Table, ValidationIssue};

/// Every source that loaded, plus what went wrong along the way.
#[derive(Debug, Default)]
pub struct LoadedSources {
    pub base: Option<ExtractedTable>,
    /// Non-base sources, ascending by priority
    pub others: Vec<ExtractedTable>,
    pub issues: Vec<ValidationIssue>,
    pub contributions: Vec<SourceContribution>,
}

/// Outcome of `validate`: issues without merging or writing anything.
#[derive(Debug, Serialize)]
pub struct ValidationReport {
    pub base_found: bool,
    pub sources: Vec<String>,
    pub issues: Vec<ValidationIssue>,
    pub contributions: Vec<SourceContribution>,
}

impl ValidationReport {
    pub fn has_blocking(&self) -> bool {
        self.issues.iter().any(|i| i.is_blocking())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Orchestrates read, detect, load, validate, merge and write.
pub struct MergePipeline {
    config: MergeConfig,
    registry: Arc<LoaderRegistry>,
    writer: Arc<dyn OutputWriter>,
}

impl MergePipeline {
    pub fn new(config: MergeConfig, registry: Arc<LoaderRegistry>, writer: Arc<dyn OutputWriter>) -> Self {
        Self {
            config,
            registry,
            writer,
        }
    }

    /// Built-in sources and a CSV writer honoring `dry_run`.
    pub fn from_config(config: MergeConfig) -> Result<Self> {
        let registry = Arc::new(LoaderRegistry::with_defaults(&config)?);
        let writer: Arc<dyn OutputWriter> = Arc::new(CsvFileWriter::new(config.dry_run));
        Ok(Self::new(config, registry, writer))
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    pub fn registry(&self) -> &LoaderRegistry {
        &self.registry
    }

    /// Merge the configured input directory, dated today.
    pub async fn run(&self) -> Result<MergeResult> {
        let input_dir = self.config.input_dir.clone();
        self.run_dir(&input_dir, Local::now().date_naive()).await
    }

    pub async fn run_dir(&self, input_dir: &Path, date: NaiveDate) -> Result<MergeResult> {
        let paths = ingestion::discover(input_dir).await?;
        self.run_files(paths, date).await
    }

    #[instrument(skip(self, paths), fields(files = paths.len(), dry_run = self.config.dry_run))]
    pub async fn run_files(&self, paths: Vec<PathBuf>, date: NaiveDate) -> Result<MergeResult> {
        info!("🚀 Starting merge run");
        let started = Instant::now();

        let loaded = self.load_sources(paths).await?;
        let LoadedSources {
            base,
            others,
            mut issues,
            contributions,
        } = loaded;

        let base = match base {
            Some(base) => base,
            None => {
                let name = self.base_name();
                error!(source = %name, "Base source missing, nothing written");
                return Err(MergeError::MissingBaseSource(name));
            }
        };

        self.enforce_gap_policy(&issues)?;

        let mut result = MergeEngine::new().merge(&base, &others)?;
        issues.append(&mut result.issues);
        result.issues = issues;
        result.contributions = contributions;

        for issue in result.issues.iter().filter(|i| i.kind == IssueKind::DuplicateColumn) {
            metrics::quality::issue_detected(issue);
        }

        let output_path = self.config.output_dir.join(output_file_name(date));
        self.writer.write_table(&output_path, &result.table).await?;
        result.output_path = Some(output_path);
        result.operations = self.writer.operations();

        let secs = started.elapsed().as_secs_f64();
        metrics::merge::completed(result.row_count, result.rows_trimmed, secs);
        info!(
            run_id = %result.run_id,
            rows = result.row_count,
            columns = result.column_count,
            issues = result.issues.len(),
            secs,
            "✅ Merge complete"
        );
        Ok(result)
    }

    /// Load and validate every input without merging.
    pub async fn validate_dir(&self, input_dir: &Path) -> Result<ValidationReport> {
        let paths = ingestion::discover(input_dir).await?;
        let loaded = self.load_sources(paths).await?;

        let mut sources: Vec<String> = loaded.base.iter().map(|b| b.source.clone()).collect();
        sources.extend(loaded.others.iter().map(|o| o.source.clone()));

        let mut issues = loaded.issues;
        if loaded.base.is_none() {
            let name = self.base_name();
            issues.push(ValidationIssue::new(
                IssueKind::MissingBaseSource,
                Severity::Blocking,
                &name,
                "",
                MergeError::MissingBaseSource(name.clone()).to_string(),
            ));
        }

        Ok(ValidationReport {
            base_found: loaded.base.is_some(),
            sources,
            issues,
            contributions: loaded.contributions,
        })
    }

    fn base_name(&self) -> String {
        self.registry
            .base()
            .map(|d| d.name.clone())
            .unwrap_or_else(|| "base".to_string())
    }

    /// Read, resolve and load every file on the bounded pool, then run
    /// the integrity checks. Only a failing base source is an error here.
    pub async fn load_sources(&self, paths: Vec<PathBuf>) -> Result<LoadedSources> {
        let mut loaded = LoadedSources::default();
        let read = ingestion::read_all(paths, self.config.max_workers).await;

        let assignments = self.assign_files(read, &mut loaded.issues);
        let results = self.load_assigned(assignments).await;

        for (loader, file, result) in results {
            let descriptor = loader.descriptor();
            match result {
                Ok(mut extracted) => {
                    let mut gap_issues = self.check_gaps(&extracted);
                    extracted.issues.append(&mut gap_issues);
                    for issue in &extracted.issues {
                        report_issue(issue);
                    }
                    loaded.issues.extend(extracted.issues.iter().cloned());
                    loaded.contributions.push(SourceContribution {
                        source: extracted.source.clone(),
                        file: file.file_name.clone(),
                        digest: file.digest.clone(),
                        rows: extracted.table.row_count(),
                        columns: extracted.table.column_names().iter().map(|c| c.to_string()).collect(),
                    });

                    if descriptor.is_base {
                        loaded.base = Some(extracted);
                    } else {
                        loaded.others.push(extracted);
                    }
                }
                Err(e) if descriptor.is_base => {
                    error!(source = %descriptor.name, file = %file.file_name, error = %e, "Base source failed to load");
                    return Err(e);
                }
                Err(e) => {
                    let kind = match e {
                        MergeError::ColumnMissing { .. } => IssueKind::MissingColumn,
                        _ => IssueKind::ParseFailure,
                    };
                    let issue = ValidationIssue::warning(
                        kind,
                        &descriptor.name,
                        "",
                        format!("{} skipped: {}", file.file_name, e),
                    );
                    report_issue(&issue);
                    metrics::ingestion::file_skipped("load_error");
                    loaded.issues.push(issue);
                }
            }
        }

        loaded.others.sort_by_key(|o| o.priority);
        Ok(loaded)
    }

    /// Pair each readable file with the loader that claims it. At most one
    /// file per source; later files (by name) are reported and ignored.
    fn assign_files(
        &self,
        read: Vec<(PathBuf, Result<SourceFile>)>,
        issues: &mut Vec<ValidationIssue>,
    ) -> Vec<(Arc<dyn SourceLoader>, SourceFile)> {
        let mut claimed: HashMap<String, String> = HashMap::new();
        let mut assignments = Vec::new();

        for (path, result) in read {
            let file = match result {
                Ok(file) => file,
                Err(e) => {
                    let issue = ValidationIssue::warning(
                        IssueKind::ParseFailure,
                        "",
                        "",
                        format!("{} unreadable: {}", path.display(), e),
                    );
                    report_issue(&issue);
                    metrics::ingestion::file_skipped("read_error");
                    issues.push(issue);
                    continue;
                }
            };

            let Some(resolved) = self.registry.resolve(&file) else {
                let issue = ValidationIssue::warning(
                    IssueKind::UnknownFile,
                    "",
                    "",
                    format!("{} matches no source, skipped", file.file_name),
                );
                report_issue(&issue);
                metrics::ingestion::file_skipped("unknown_source");
                issues.push(issue);
                continue;
            };

            let source = resolved.loader.name().to_string();
            if resolved.is_ambiguous() {
                let mut candidates = vec![source.clone()];
                candidates.extend(resolved.also_matched.iter().cloned());
                let err = MergeError::AmbiguousDetection {
                    file: file.file_name.clone(),
                    candidates,
                    chosen: source.clone(),
                };
                let issue = ValidationIssue::warning(IssueKind::AmbiguousDetection, &source, "", err.to_string());
                report_issue(&issue);
                issues.push(issue);
            }

            if let Some(first) = claimed.get(&source) {
                let issue = ValidationIssue::warning(
                    IssueKind::DuplicateSource,
                    &source,
                    "",
                    format!("{} ignored, already using {}", file.file_name, first),
                );
                report_issue(&issue);
                metrics::ingestion::file_skipped("duplicate_source");
                issues.push(issue);
                continue;
            }

            debug!(file = %file.file_name, source = %source, "Resolved input file");
            metrics::ingestion::file_resolved(&source);
            claimed.insert(source, file.file_name.clone());
            assignments.push((resolved.loader, file));
        }

        assignments
    }

    /// Run each loader on a blocking task, at most `max_workers` at once.
    async fn load_assigned(
        &self,
        assignments: Vec<(Arc<dyn SourceLoader>, SourceFile)>,
    ) -> Vec<(Arc<dyn SourceLoader>, SourceFile, Result<ExtractedTable>)> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let mut handles = Vec::with_capacity(assignments.len());

        for (loader, file) in assignments {
            let semaphore = Arc::clone(&semaphore);
            let task_loader = Arc::clone(&loader);
            let task_file = file.clone();
            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return Err(MergeError::Worker(e.to_string())),
                };
                let loaded = tokio::task::spawn_blocking(move || {
                    let started = Instant::now();
                    let result = task_loader.load(&task_file);
                    metrics::ingestion::source_load_duration(task_loader.name(), started.elapsed().as_secs_f64());
                    result
                })
                .await;
                match loaded {
                    Ok(result) => result,
                    Err(e) => Err(MergeError::Worker(e.to_string())),
                }
            });
            handles.push((loader, file, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (loader, file, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(MergeError::Worker(e.to_string())),
            };
            results.push((loader, file, result));
        }
        results
    }

    /// Gap checks on every column the source actually delivered. Columns
    /// absent from the file were already reported as missing. A long gap in
    /// a `zero_default` column is downgraded to a warning since the merge
    /// substitutes a value there.
    fn check_gaps(&self, extracted: &ExtractedTable) -> Vec<ValidationIssue> {
        let absent: HashSet<&str> = extracted
            .issues
            .iter()
            .filter(|i| i.kind == IssueKind::MissingColumn)
            .map(|i| i.column.as_str())
            .collect();
        let checked: Vec<Column> = extracted
            .table
            .columns()
            .iter()
            .filter(|c| !absent.contains(c.name.as_str()))
            .cloned()
            .collect();
        let table = Table::from_columns(checked);

        let mut issues = IntegrityValidator::new(self.config.gap_threshold).validate(&table, &extracted.source);
        for issue in issues.iter_mut().filter(|i| i.is_blocking()) {
            if let FallbackPolicy::ZeroDefault(value) = extracted.policy(&issue.column) {
                issue.severity = Severity::Warning;
                issue.message = format!("{} (substituted with {})", issue.message, value);
            }
        }
        issues
    }

    /// Blocking issues abort the run unless gaps are allowed.
    fn enforce_gap_policy(&self, issues: &[ValidationIssue]) -> Result<()> {
        let Some(blocking) = issues.iter().find(|i| i.is_blocking()) else {
            return Ok(());
        };
        if self.config.allow_gaps {
            warn!(
                source = %blocking.source,
                column = %blocking.column,
                "Blocking gap allowed by configuration"
            );
            return Ok(());
        }
        Err(MergeError::GapExceeded {
            source_name: blocking.source.clone(),
            column: blocking.column.clone(),
            run_length: blocking.run_length,
            threshold: self.config.gap_threshold,
        })
    }
}

fn report_issue(issue: &ValidationIssue) {
    metrics::quality::issue_detected(issue);
    warn!(
        source = %issue.source,
        column = %issue.column,
        kind = issue.kind.as_str(),
        severity = %issue.severity,
        "{}",
        issue.message
    );
}
