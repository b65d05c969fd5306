//! Metrics for the merge pipeline, recorded through the `metrics` facade.
//!
//! Nothing is exported unless a recorder is installed with [`init_metrics`].

use std::fmt;
use std::net::SocketAddr;

use tracing::{info, warn};

/// Enum representing all metric names used by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    FilesResolved,
    FilesSkipped,
    IssuesDetected,
    RowsMerged,
    RowsTrimmed,
    MergeDuration,
    SourceLoadDuration,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::FilesResolved => "intervals_files_resolved_total",
            MetricName::FilesSkipped => "intervals_files_skipped_total",
            MetricName::IssuesDetected => "intervals_issues_total",
            MetricName::RowsMerged => "intervals_rows_merged",
            MetricName::RowsTrimmed => "intervals_rows_trimmed",
            MetricName::MergeDuration => "intervals_merge_duration_seconds",
            MetricName::SourceLoadDuration => "intervals_source_load_duration_seconds",
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        [
            MetricName::FilesResolved,
            MetricName::FilesSkipped,
            MetricName::IssuesDetected,
            MetricName::RowsMerged,
            MetricName::RowsTrimmed,
            MetricName::MergeDuration,
            MetricName::SourceLoadDuration,
        ]
        .into_iter()
    }
}

/// Installs a Prometheus exporter when `INTERVALS_METRICS_ADDR` is set.
/// Must be called from inside a tokio runtime.
pub fn init_metrics() {
    let Ok(raw) = std::env::var("INTERVALS_METRICS_ADDR") else {
        return;
    };
    let addr: SocketAddr = match raw.parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!(value = %raw, error = %e, "Ignoring invalid INTERVALS_METRICS_ADDR");
            return;
        }
    };

    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => info!(%addr, "Prometheus exporter listening"),
        Err(e) => warn!(error = %e, "Prometheus exporter install failed"),
    }
}

pub mod ingestion {
    use super::MetricName;

    pub fn file_resolved(source: &str) {
        ::metrics::counter!(MetricName::FilesResolved.as_str(), "source" => source.to_string()).increment(1);
    }

    pub fn file_skipped(reason: &str) {
        ::metrics::counter!(MetricName::FilesSkipped.as_str(), "reason" => reason.to_string()).increment(1);
    }

    pub fn source_load_duration(source: &str, secs: f64) {
        ::metrics::histogram!(MetricName::SourceLoadDuration.as_str(), "source" => source.to_string()).record(secs);
    }
}

pub mod quality {
    use super::MetricName;
    use crate::types::ValidationIssue;

    pub fn issue_detected(issue: &ValidationIssue) {
        ::metrics::counter!(
            MetricName::IssuesDetected.as_str(),
            "kind" => issue.kind.as_str(),
            "severity" => issue.severity.to_string()
        )
        .increment(1);
    }
}

pub mod merge {
    use super::MetricName;

    pub fn completed(rows: usize, trimmed: usize, secs: f64) {
        ::metrics::gauge!(MetricName::RowsMerged.as_str()).set(rows as f64);
        ::metrics::gauge!(MetricName::RowsTrimmed.as_str()).set(trimmed as f64);
        ::metrics::histogram!(MetricName::MergeDuration.as_str()).record(secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_prefixed_and_unique() {
        let names: Vec<&str> = MetricName::all_metrics().map(|m| m.as_str()).collect();
        assert!(names.iter().all(|n| n.starts_with("intervals_")));
        let mut deduped = names.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), names.len());
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        ingestion::file_resolved("wahoo");
        ingestion::file_skipped("unknown");
        merge::completed(10, 2, 0.01);
    }
}
