// Observability: metrics for the merge pipeline

pub mod metrics;

pub use metrics::init_metrics;
