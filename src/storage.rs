use crate::constants::{OUTPUT_FILE_PREFIX, OUTPUT_FILE_SUFFIX};
use crate::error::{MergeError, Result};
use crate::types::Table;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Output file name for a processing date: `Trening-DD.MM.YYYY-import.csv`.
pub fn output_file_name(date: NaiveDate) -> String {
    format!(
        "{}-{}-{}",
        OUTPUT_FILE_PREFIX,
        date.format("%d.%m.%Y"),
        OUTPUT_FILE_SUFFIX
    )
}

/// Serialize a table as CSV with a header row.
pub fn table_to_csv(table: &Table) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(table.column_names())?;
    for idx in 0..table.row_count() {
        writer.write_record(table.row(idx).iter().map(|v| v.render()))?;
    }
    writer
        .into_inner()
        .map_err(|e| MergeError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
}

/// Destination for the merged table
#[async_trait]
pub trait OutputWriter: Send + Sync {
    async fn write_table(&self, path: &Path, table: &Table) -> Result<()>;

    /// Operations performed (or, in dry-run mode, skipped) so far.
    fn operations(&self) -> Vec<String>;
}

/// Writes CSV files to disk, or only records the writes in dry-run mode.
pub struct CsvFileWriter {
    dry_run: bool,
    operations: Mutex<Vec<String>>,
}

impl CsvFileWriter {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            operations: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, op: String) {
        self.operations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(op);
    }
}

#[async_trait]
impl OutputWriter for CsvFileWriter {
    async fn write_table(&self, path: &Path, table: &Table) -> Result<()> {
        let bytes = table_to_csv(table)?;

        if self.dry_run {
            info!(path = %path.display(), rows = table.row_count(), "Dry run, not writing output");
            self.record(format!(
                "[DRY RUN] write {} ({} rows, {} columns, {} bytes)",
                path.display(),
                table.row_count(),
                table.column_count(),
                bytes.len()
            ));
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "Wrote output file");
        self.record(format!("write {}", path.display()));
        Ok(())
    }

    fn operations(&self) -> Vec<String> {
        self.operations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// In-memory writer for development/testing
#[derive(Clone, Default)]
pub struct InMemoryWriter {
    files: Arc<Mutex<HashMap<PathBuf, String>>>,
}

impl InMemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<String> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.files.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl OutputWriter for InMemoryWriter {
    async fn write_table(&self, path: &Path, table: &Table) -> Result<()> {
        let bytes = table_to_csv(table)?;
        let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        files.insert(path.to_path_buf(), String::from_utf8_lossy(&bytes).into_owned());
        Ok(())
    }

    fn operations(&self) -> Vec<String> {
        let files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        let mut ops: Vec<String> = files.keys().map(|p| format!("write {}", p.display())).collect();
        ops.sort();
        ops
    }
}
