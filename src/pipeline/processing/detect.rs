use regex::Regex;

use crate::error::{MergeError, Result};
use crate::pipeline::ingestion::reader::{find_header_row, split_header};
use crate::pipeline::ingestion::SourceFile;

/// Case-insensitive filename glob (`*` and `?` wildcards).
#[derive(Debug, Clone)]
pub struct FilenamePattern {
    glob: String,
    regex: Regex,
}

impl FilenamePattern {
    pub fn new(glob: &str) -> Result<Self> {
        let mut pattern = String::from("(?i)^");
        for ch in glob.chars() {
            match ch {
                '*' => pattern.push_str(".*"),
                '?' => pattern.push('.'),
                other => pattern.push_str(&regex::escape(&other.to_string())),
            }
        }
        pattern.push('$');

        let regex = Regex::new(&pattern)
            .map_err(|e| MergeError::Config(format!("Invalid filename pattern '{}': {}", glob, e)))?;
        Ok(Self {
            glob: glob.to_string(),
            regex,
        })
    }

    pub fn glob(&self) -> &str {
        &self.glob
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.regex.is_match(file_name)
    }
}

impl PartialEq for FilenamePattern {
    fn eq(&self, other: &Self) -> bool {
        self.glob.eq_ignore_ascii_case(&other.glob)
    }
}

/// What the file content must look like.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderRequirement {
    /// No content check
    Any,
    /// First line does not contain the named field
    FirstLineLacks(String),
    /// First line contains the named field
    FirstLineHas(String),
    /// Some line within the scan window contains all fields
    ScanFor(Vec<String>),
}

impl HeaderRequirement {
    pub fn accepts(&self, file: &SourceFile, max_lines: usize) -> bool {
        match self {
            HeaderRequirement::Any => true,
            HeaderRequirement::FirstLineLacks(field) => !first_line_has(file, field),
            HeaderRequirement::FirstLineHas(field) => first_line_has(file, field),
            HeaderRequirement::ScanFor(fields) => {
                let keywords: Vec<&str> = fields.iter().map(|f| f.as_str()).collect();
                find_header_row(file.head_lines(max_lines), &keywords, max_lines).is_some()
            }
        }
    }
}

fn first_line_has(file: &SourceFile, field: &str) -> bool {
    split_header(file.first_line())
        .iter()
        .any(|f| f.eq_ignore_ascii_case(field))
}

/// How filename and header checks combine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Combine {
    /// Filename and header must both match
    Both,
    /// Either check is enough
    Either,
}

/// Classifies a raw file as belonging to one source. An empty pattern
/// list accepts any filename.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRule {
    pub patterns: Vec<FilenamePattern>,
    pub header: HeaderRequirement,
    pub combine: Combine,
}

impl DetectionRule {
    pub fn new(globs: &[&str], header: HeaderRequirement, combine: Combine) -> Result<Self> {
        let patterns = globs
            .iter()
            .map(|g| FilenamePattern::new(g))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            patterns,
            header,
            combine,
        })
    }

    pub fn with_patterns(mut self, globs: &[String]) -> Result<Self> {
        self.patterns = globs
            .iter()
            .map(|g| FilenamePattern::new(g))
            .collect::<Result<Vec<_>>>()?;
        Ok(self)
    }

    pub fn filename_matches(&self, file_name: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.matches(file_name))
    }

    pub fn matches(&self, file: &SourceFile, max_lines: usize) -> bool {
        match self.combine {
            Combine::Both => {
                self.filename_matches(&file.file_name) && self.header.accepts(file, max_lines)
            }
            Combine::Either => {
                let by_name = !self.patterns.is_empty() && self.filename_matches(&file.file_name);
                by_name || (self.header != HeaderRequirement::Any && self.header.accepts(file, max_lines))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_is_case_insensitive_and_anchored() {
        let pattern = FilenamePattern::new("*streams.csv").unwrap();
        assert!(pattern.matches("2024-03-07_STREAMS.CSV"));
        assert!(!pattern.matches("streams.csv.bak"));

        let session = FilenamePattern::new("session_*.csv").unwrap();
        assert!(session.matches("session_0412.csv"));
        assert!(!session.matches("my_session_0412.csv"));
    }

    #[test]
    fn test_both_requires_name_and_header() {
        let rule = DetectionRule::new(
            &["*streams.csv"],
            HeaderRequirement::FirstLineLacks("hrv".to_string()),
            Combine::Both,
        )
        .unwrap();

        let wahoo = SourceFile::from_text("ride_streams.csv", "secs,watts\n0,100\n");
        let garmin = SourceFile::from_text("ride_streams.csv", "secs,hrv\n0,50\n");
        let other = SourceFile::from_text("ride.csv", "secs,watts\n0,100\n");
        assert!(rule.matches(&wahoo, 60));
        assert!(!rule.matches(&garmin, 60));
        assert!(!rule.matches(&other, 60));
    }

    #[test]
    fn test_either_accepts_header_scan() {
        let rule = DetectionRule::new(
            &["*trainred*"],
            HeaderRequirement::ScanFor(vec!["SmO2".to_string(), "THb".to_string()]),
            Combine::Either,
        )
        .unwrap();

        let by_name = SourceFile::from_text("TrainRed_export.csv", "x\n1\n");
        let by_header = SourceFile::from_text("export.csv", "meta\nTimestamp,SmO2,THb unfiltered\n");
        let neither = SourceFile::from_text("export.csv", "secs,watts\n");
        assert!(rule.matches(&by_name, 60));
        assert!(rule.matches(&by_header, 60));
        assert!(!rule.matches(&neither, 60));
    }

    #[test]
    fn test_structural_equality_ignores_glob_case() {
        let a = DetectionRule::new(&["*Streams.csv"], HeaderRequirement::Any, Combine::Both).unwrap();
        let b = DetectionRule::new(&["*streams.CSV"], HeaderRequirement::Any, Combine::Both).unwrap();
        assert_eq!(a, b);
    }
}
