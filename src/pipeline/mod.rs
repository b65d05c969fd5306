// Merge pipeline: ingestion, per-source processing, and orchestration

pub mod ingestion;
pub mod orchestrator;
pub mod processing;

// Re-export key types from each stage
pub use orchestrator::{LoadedSources, MergePipeline, ValidationReport};
pub use processing::merge::{MergeResult, SourceContribution};
pub use processing::registry::LoaderRegistry;
