// Base trait and utilities for source-specific loaders
pub mod base;

// Individual loader implementations
pub mod garmin;
pub mod trainred;
pub mod tymewear;
pub mod wahoo;

pub use base::{LoaderSettings, LoaderUtils, NormalizedTable, SourceDescriptor, SourceLoader};
pub use garmin::GarminLoader;
pub use trainred::TrainRedLoader;
pub use tymewear::TymewearLoader;
pub use wahoo::WahooLoader;

use std::sync::Arc;

use crate::constants::{GARMIN, TRAINRED, TYMEWEAR, WAHOO};
use crate::error::{MergeError, Result};

/// Built-in descriptor for a source name
pub fn default_descriptor(name: &str) -> Result<SourceDescriptor> {
    match name {
        WAHOO => WahooLoader::default_descriptor(),
        TRAINRED => TrainRedLoader::default_descriptor(),
        TYMEWEAR => TymewearLoader::default_descriptor(),
        GARMIN => GarminLoader::default_descriptor(),
        other => Err(MergeError::Config(format!("Unknown source '{}'", other))),
    }
}

/// Loader implementation for a descriptor, chosen by source name
pub fn build_loader(descriptor: SourceDescriptor, settings: LoaderSettings) -> Result<Arc<dyn SourceLoader>> {
    let loader: Arc<dyn SourceLoader> = match descriptor.name.as_str() {
        WAHOO => Arc::new(WahooLoader::new(descriptor, settings)),
        TRAINRED => Arc::new(TrainRedLoader::new(descriptor, settings)),
        TYMEWEAR => Arc::new(TymewearLoader::new(descriptor, settings)),
        GARMIN => Arc::new(GarminLoader::new(descriptor, settings)),
        other => return Err(MergeError::Config(format!("No loader implementation for source '{}'", other))),
    };
    Ok(loader)
}
