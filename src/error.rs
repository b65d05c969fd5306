use thiserror::Error;

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Base source '{0}' not found among input files")]
    MissingBaseSource(String),

    #[error("Failed to parse {file}: {reason}")]
    Parse { file: String, reason: String },

    #[error("Column '{column}' missing from {source_name}{}", suggestion_hint(.suggestion))]
    ColumnMissing {
        source_name: String,
        column: String,
        required: bool,
        suggestion: Option<String>,
    },

    #[error("File {file} matched several sources {candidates:?}, using '{chosen}'")]
    AmbiguousDetection {
        file: String,
        candidates: Vec<String>,
        chosen: String,
    },

    #[error("Gap of {run_length} consecutive missing values in {source_name}.{column} exceeds threshold {threshold}")]
    GapExceeded {
        source_name: String,
        column: String,
        run_length: usize,
        threshold: usize,
    },

    #[error("Merge produced no rows after trimming to the common window")]
    EmptyResult,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn suggestion_hint(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (did you mean '{}'?)", s),
        None => String::new(),
    }
}

impl MergeError {
    /// Errors that abort the whole run rather than a single source.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MergeError::MissingBaseSource(_)
                | MergeError::EmptyResult
                | MergeError::GapExceeded { .. }
                | MergeError::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MergeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_missing_mentions_suggestion() {
        let err = MergeError::ColumnMissing {
            source_name: "tymewear".to_string(),
            column: "VE".to_string(),
            required: true,
            suggestion: Some("VE ".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("tymewear"));
        assert!(msg.contains("did you mean 'VE '"));
    }

    #[test]
    fn parse_errors_are_not_fatal() {
        let err = MergeError::Parse {
            file: "a.csv".to_string(),
            reason: "empty".to_string(),
        };
        assert!(!err.is_fatal());
        assert!(MergeError::MissingBaseSource("wahoo".to_string()).is_fatal());
    }
}
