// Ingestion: discovering input files and reading them on a bounded pool

pub mod reader;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

use crate::error::{MergeError, Result};

/// One input file held in memory. Detection and parsing both work from
/// these bytes so nothing is read from disk twice.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub file_name: String,
    pub contents: String,
    /// SHA-256 of the raw bytes, hex encoded
    pub digest: String,
}

impl SourceFile {
    pub fn from_bytes(path: impl Into<PathBuf>, bytes: &[u8]) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let digest = hex::encode(Sha256::digest(bytes));
        let text = String::from_utf8_lossy(bytes);
        let contents = text.strip_prefix('\u{feff}').unwrap_or(&*text).to_string();

        Self {
            path,
            file_name,
            contents,
            digest,
        }
    }

    pub fn from_text(path: impl Into<PathBuf>, text: &str) -> Self {
        Self::from_bytes(path, text.as_bytes())
    }

    pub fn first_line(&self) -> &str {
        self.contents.lines().next().unwrap_or("")
    }

    pub fn head_lines(&self, max_lines: usize) -> impl Iterator<Item = &str> {
        self.contents.lines().take(max_lines)
    }
}

/// CSV files directly inside `dir`, sorted by file name.
pub async fn discover(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
        MergeError::Config(format!("Cannot read input directory '{}': {}", dir.display(), e))
    })?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_csv = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if is_csv && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Reads every path on blocking tasks, at most `max_workers` at a time.
/// Results come back in input order.
#[instrument(skip(paths), fields(files = paths.len()))]
pub async fn read_all(paths: Vec<PathBuf>, max_workers: usize) -> Vec<(PathBuf, Result<SourceFile>)> {
    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
    let mut handles = Vec::with_capacity(paths.len());

    for path in paths {
        let semaphore = Arc::clone(&semaphore);
        let task_path = path.clone();
        let handle = tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => return Err(MergeError::Worker(e.to_string())),
            };
            let read = tokio::task::spawn_blocking(move || -> Result<SourceFile> {
                let bytes = std::fs::read(&task_path)?;
                debug!(file = %task_path.display(), bytes = bytes.len(), "Read input file");
                Ok(SourceFile::from_bytes(task_path, &bytes))
            })
            .await;
            match read {
                Ok(result) => result,
                Err(e) => Err(MergeError::Worker(e.to_string())),
            }
        });
        handles.push((path, handle));
    }

    let mut results = Vec::with_capacity(handles.len());
    for (path, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(MergeError::Worker(e.to_string())),
        };
        results.push((path, result));
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_file_strips_bom_and_hashes_bytes() {
        let file = SourceFile::from_text("dir/a_streams.csv", "\u{feff}secs,watts\n0,100\n");
        assert_eq!(file.file_name, "a_streams.csv");
        assert_eq!(file.first_line(), "secs,watts");
        assert_eq!(file.digest.len(), 64);
    }

    #[tokio::test]
    async fn test_discover_and_read_all_keep_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.csv"), "x\n1\n").unwrap();
        std::fs::write(dir.path().join("a.CSV"), "y\n2\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let paths = discover(dir.path()).await.unwrap();
        assert_eq!(paths.len(), 2);

        let results = read_all(paths, 1).await;
        let names: Vec<String> = results
            .iter()
            .map(|(_, r)| r.as_ref().unwrap().file_name.clone())
            .collect();
        assert_eq!(names, vec!["a.CSV".to_string(), "b.csv".to_string()]);
    }

    #[tokio::test]
    async fn test_read_all_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let results = read_all(vec![dir.path().join("gone.csv")], 2).await;
        assert!(matches!(results[0].1, Err(MergeError::Io(_))));
    }
}
