pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod observability;
pub mod pipeline;
pub mod storage;
pub mod types;

pub use config::MergeConfig;
pub use error::{MergeError, Result};
pub use pipeline::{LoaderRegistry, MergePipeline, MergeResult};
