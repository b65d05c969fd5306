// Pipeline processing: detection, loading, rate normalization, validation and merging

pub mod detect;
pub mod loaders;
pub mod merge;
pub mod quality_gate;
pub mod rate;
pub mod registry;
