use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use super::loaders::{build_loader, default_descriptor, LoaderSettings, SourceDescriptor, SourceLoader};
use crate::config::{MergeConfig, SourceOverride};
use crate::constants::get_supported_sources;
use crate::error::{MergeError, Result};
use crate::pipeline::ingestion::SourceFile;
use crate::types::{ColumnSpec, FallbackPolicy};

/// Outcome of resolving a file: the winning loader plus any other
/// sources whose rules also accepted it.
pub struct Resolved {
    pub loader: Arc<dyn SourceLoader>,
    pub also_matched: Vec<String>,
}

impl Resolved {
    pub fn is_ambiguous(&self) -> bool {
        !self.also_matched.is_empty()
    }
}

/// Registry of source loaders, ordered by priority. Built once before a
/// run and shared read-only afterwards.
#[derive(Default)]
pub struct LoaderRegistry {
    // Kept sorted by priority; registration order breaks ties
    loaders: Vec<Arc<dyn SourceLoader>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the four built-in sources, adjusted by the column
    /// mapping overrides in `config`.
    pub fn with_defaults(config: &MergeConfig) -> Result<Self> {
        let settings = LoaderSettings::from(config);
        let builtin = get_supported_sources();

        if let Some(unknown) = config.sources.iter().find(|s| !builtin.contains(&s.name.as_str())) {
            return Err(MergeError::Config(format!(
                "Override for unknown source '{}' (known: {})",
                unknown.name,
                builtin.join(", ")
            )));
        }

        let mut registry = Self::new();
        for name in builtin {
            let mut descriptor = default_descriptor(name)?;
            if let Some(overrides) = config.source_override(name) {
                apply_override(&mut descriptor, overrides)?;
            }
            registry.register(build_loader(descriptor, settings.clone())?)?;
        }

        info!(sources = ?registry.list_sources(), "Loader registry ready");
        Ok(registry)
    }

    /// Register a loader. Rejects duplicate names, output column
    /// collisions, a detection rule identical to an existing one and a
    /// second base source.
    pub fn register(&mut self, loader: Arc<dyn SourceLoader>) -> Result<()> {
        let new = loader.descriptor();

        let mut own_outputs = HashSet::new();
        for output in new.output_names() {
            if !own_outputs.insert(output) {
                return Err(MergeError::Config(format!(
                    "Source '{}' declares output column '{}' twice",
                    new.name, output
                )));
            }
        }

        for existing in self.loaders.iter().map(|l| l.descriptor()) {
            if existing.name == new.name {
                return Err(MergeError::Config(format!("Source '{}' is already registered", new.name)));
            }
            if let Some(clash) = new
                .output_names()
                .into_iter()
                .find(|o| existing.output_names().contains(o))
            {
                return Err(MergeError::Config(format!(
                    "Output column '{}' of '{}' collides with source '{}'",
                    clash, new.name, existing.name
                )));
            }
            if existing.detection == new.detection {
                return Err(MergeError::Config(format!(
                    "Detection rule of '{}' is identical to that of '{}'",
                    new.name, existing.name
                )));
            }
            if existing.is_base && new.is_base {
                return Err(MergeError::Config(format!(
                    "Source '{}' cannot be a base source, '{}' already is",
                    new.name, existing.name
                )));
            }
        }

        debug!(source = %new.name, priority = new.priority, "Registered loader");
        let position = self
            .loaders
            .iter()
            .position(|l| l.descriptor().priority > new.priority)
            .unwrap_or(self.loaders.len());
        self.loaders.insert(position, loader);
        Ok(())
    }

    /// The lowest-priority loader whose rule accepts the file, if any.
    pub fn resolve(&self, file: &SourceFile) -> Option<Resolved> {
        let mut matching = self.loaders.iter().filter(|l| l.detect(file));
        let loader = Arc::clone(matching.next()?);
        let also_matched = matching.map(|l| l.name().to_string()).collect();
        Some(Resolved { loader, also_matched })
    }

    /// All descriptors, ascending by priority.
    pub fn ordered_descriptors(&self) -> Vec<&SourceDescriptor> {
        self.loaders.iter().map(|l| l.descriptor()).collect()
    }

    pub fn base(&self) -> Option<&SourceDescriptor> {
        self.ordered_descriptors().into_iter().find(|d| d.is_base)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SourceLoader>> {
        self.loaders.iter().find(|l| l.name() == name).cloned()
    }

    pub fn list_sources(&self) -> Vec<&str> {
        self.loaders.iter().map(|l| l.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

fn apply_override(descriptor: &mut SourceDescriptor, overrides: &SourceOverride) -> Result<()> {
    if let Some(priority) = overrides.priority {
        descriptor.priority = priority;
    }
    if let Some(patterns) = &overrides.patterns {
        descriptor.detection = descriptor.detection.clone().with_patterns(patterns)?;
    }

    for column in &overrides.columns {
        let position = descriptor
            .columns
            .iter()
            .position(|c| c.source == column.source);
        match position {
            Some(idx) => {
                let spec = &mut descriptor.columns[idx];
                if let Some(output) = &column.output {
                    spec.output = output.clone();
                }
                if !column.aliases.is_empty() {
                    spec.aliases = column.aliases.clone();
                }
                if let Some(policy) = column.policy() {
                    spec.fallback = policy;
                }
            }
            None => {
                let output = column.output.clone().unwrap_or_else(|| column.source.clone());
                let policy = column.policy().unwrap_or(FallbackPolicy::PreserveMissing);
                let mut spec = ColumnSpec::new(&column.source, &output, policy);
                spec.aliases = column.aliases.clone();
                descriptor.columns.push(spec);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColumnOverride;
    use crate::pipeline::processing::detect::{Combine, DetectionRule, HeaderRequirement};
    use crate::pipeline::processing::loaders::GarminLoader;

    fn defaults() -> LoaderRegistry {
        LoaderRegistry::with_defaults(&MergeConfig::default()).unwrap()
    }

    #[test]
    fn test_registry_has_built_in_loaders_in_priority_order() {
        let registry = defaults();
        assert_eq!(registry.list_sources(), vec!["wahoo", "trainred", "tymewear", "garmin"]);
        assert_eq!(registry.base().map(|d| d.name.as_str()), Some("wahoo"));
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let registry = defaults();
        let wahoo = SourceFile::from_text("ride_streams.csv", "secs,watts\n0,100\n");
        let garmin = SourceFile::from_text("watch_streams.csv", "secs,hrv\n0,45\n");
        let unknown = SourceFile::from_text("notes.csv", "a,b\n1,2\n");

        for _ in 0..3 {
            assert_eq!(registry.resolve(&wahoo).map(|r| r.loader.name().to_string()).as_deref(), Some("wahoo"));
            assert_eq!(registry.resolve(&garmin).map(|r| r.loader.name().to_string()).as_deref(), Some("garmin"));
            assert!(registry.resolve(&unknown).is_none());
        }
    }

    #[test]
    fn test_overlap_resolves_to_lowest_priority() {
        let registry = defaults();
        // Named like a TrainRed session but carrying a Tymewear header
        let file = SourceFile::from_text("session_1.csv", "BR,VT,VE\n30,1.5,40\n");
        let resolved = registry.resolve(&file).unwrap();
        assert_eq!(resolved.loader.name(), "trainred");
        assert!(resolved.is_ambiguous());
        assert_eq!(resolved.also_matched, vec!["tymewear".to_string()]);
    }

    fn garmin_variant(name: &str, outputs: &[&str], globs: &[&str]) -> Arc<dyn SourceLoader> {
        let mut descriptor = GarminLoader::default_descriptor().unwrap();
        descriptor.name = name.to_string();
        descriptor.columns = outputs
            .iter()
            .map(|o| ColumnSpec::new(o, o, FallbackPolicy::Omit))
            .collect();
        descriptor.detection = DetectionRule::new(globs, HeaderRequirement::Any, Combine::Both).unwrap();
        Arc::new(GarminLoader::new(descriptor, LoaderSettings::default()))
    }

    #[test]
    fn test_register_rejects_conflicts() {
        let mut registry = defaults();
        assert!(registry.register(garmin_variant("garmin", &["x"], &["*.x"])).is_err());
        assert!(registry.register(garmin_variant("polar", &["hrv"], &["*.y"])).is_err());
        assert!(registry.register(garmin_variant("polar", &["x", "x"], &["*.y"])).is_err());
        assert!(registry.register(garmin_variant("polar", &["x"], &["*.y"])).is_ok());
        assert!(registry.register(garmin_variant("suunto", &["z"], &["*.Y"])).is_err());
    }

    #[test]
    fn test_register_rejects_second_base() {
        let mut registry = defaults();
        let mut descriptor = GarminLoader::default_descriptor().unwrap();
        descriptor.name = "other_base".to_string();
        descriptor.is_base = true;
        descriptor.columns = vec![ColumnSpec::new("q", "q", FallbackPolicy::Required)];
        descriptor.detection = DetectionRule::new(&["*.q"], HeaderRequirement::Any, Combine::Both).unwrap();
        let loader = Arc::new(GarminLoader::new(descriptor, LoaderSettings::default()));
        assert!(registry.register(loader).is_err());
    }

    #[test]
    fn test_overrides_change_columns_and_priority() {
        let mut config = MergeConfig::default();
        config.sources.push(SourceOverride {
            name: "tymewear".to_string(),
            priority: Some(40),
            patterns: None,
            columns: vec![ColumnOverride {
                source: "VE".to_string(),
                output: Some("ventilation".to_string()),
                aliases: vec!["VE (L/min)".to_string()],
                fallback: None,
                fallback_value: None,
            }],
        });
        let registry = LoaderRegistry::with_defaults(&config).unwrap();
        assert_eq!(registry.list_sources(), vec!["wahoo", "trainred", "garmin", "tymewear"]);

        let tyme = registry.get("tymewear").unwrap();
        assert!(tyme.descriptor().output_names().contains(&"ventilation"));
    }

    #[test]
    fn test_override_for_unknown_source_fails() {
        let mut config = MergeConfig::default();
        config.sources.push(SourceOverride {
            name: "polar".to_string(),
            ..Default::default()
        });
        assert!(LoaderRegistry::with_defaults(&config).is_err());
    }
}
