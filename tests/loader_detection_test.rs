use std::sync::Arc;

use intervals_merge::config::MergeConfig;
use intervals_merge::error::MergeError;
use intervals_merge::pipeline::ingestion::reader::read_table;
use intervals_merge::pipeline::ingestion::SourceFile;
use intervals_merge::pipeline::processing::detect::{Combine, DetectionRule, HeaderRequirement};
use intervals_merge::pipeline::processing::loaders::{LoaderSettings, SourceDescriptor, SourceLoader};
use intervals_merge::pipeline::LoaderRegistry;
use intervals_merge::types::{ColumnSpec, FallbackPolicy, RawTable};

struct PolarLoader {
    descriptor: SourceDescriptor,
    settings: LoaderSettings,
}

impl PolarLoader {
    fn new(output: &str) -> Self {
        Self {
            descriptor: SourceDescriptor {
                name: "polar".to_string(),
                priority: 40,
                is_base: false,
                detection: DetectionRule::new(&["*polar*.csv"], HeaderRequirement::Any, Combine::Both).unwrap(),
                columns: vec![ColumnSpec::new("RR", output, FallbackPolicy::PreserveMissing)],
                passthrough: false,
            },
            settings: LoaderSettings::default(),
        }
    }
}

impl SourceLoader for PolarLoader {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    fn settings(&self) -> &LoaderSettings {
        &self.settings
    }

    fn parse(&self, file: &SourceFile) -> intervals_merge::Result<RawTable> {
        Ok(RawTable {
            file: file.file_name.clone(),
            table: read_table(&file.contents, 0, &file.file_name)?,
        })
    }
}

fn registry() -> LoaderRegistry {
    LoaderRegistry::with_defaults(&MergeConfig::default()).unwrap()
}

#[test]
fn builtin_sources_are_ordered_by_priority() {
    let registry = registry();
    assert_eq!(registry.list_sources(), vec!["wahoo", "trainred", "tymewear", "garmin"]);
    assert_eq!(registry.base().unwrap().name, "wahoo");
}

#[test]
fn each_export_resolves_to_its_source() {
    let registry = registry();
    let cases = [
        ("2024-05-01_streams.csv", "secs,watts,heartrate\n0,200,140\n", "wahoo"),
        ("2024-05-01_watch_streams.csv", "secs,hrv,skin_temperature\n0,40,33\n", "garmin"),
        ("session_7.csv", "Device,TR\nTimestamp,SmO2,THb\n0,60,12\n", "trainred"),
        ("export.csv", "Athlete,X\nTime,BR,VT,VE\n0,30,1.8,50\n", "tymewear"),
        ("my_trainred.CSV", "Timestamp,SmO2\n0,60\n", "trainred"),
    ];

    for (name, text, expected) in cases {
        let resolved = registry.resolve(&SourceFile::from_text(name, text)).unwrap();
        assert_eq!(resolved.loader.name(), expected, "file {name}");
    }
}

#[test]
fn unmatched_file_resolves_to_nothing() {
    let registry = registry();
    assert!(registry.resolve(&SourceFile::from_text("notes.csv", "a,b\n1,2\n")).is_none());
}

#[test]
fn overlapping_rules_resolve_deterministically() {
    let registry = registry();
    // Claimed by trainred through its name and by tymewear through its header
    let file = SourceFile::from_text("trainred_breath.csv", "Time,BR,VT,VE\n0,30,1.8,50\n");

    for _ in 0..20 {
        let resolved = registry.resolve(&file).unwrap();
        assert_eq!(resolved.loader.name(), "trainred");
        assert_eq!(resolved.also_matched, vec!["tymewear".to_string()]);
        assert!(resolved.is_ambiguous());
    }
}

#[test]
fn custom_loader_can_be_registered() {
    let mut registry = registry();
    registry.register(Arc::new(PolarLoader::new("rr_interval"))).unwrap();

    assert_eq!(registry.len(), 5);
    assert_eq!(registry.list_sources().last(), Some(&"polar"));

    let file = SourceFile::from_text("polar_h10.csv", "time,RR\n0,812\n1,\n");
    let resolved = registry.resolve(&file).unwrap();
    assert_eq!(resolved.loader.name(), "polar");

    let extracted = resolved.loader.load(&file).unwrap();
    assert_eq!(extracted.table.column_names(), vec!["rr_interval"]);
    assert_eq!(extracted.table.row_count(), 2);
}

#[test]
fn colliding_output_column_is_rejected() {
    let mut registry = registry();
    let err = registry.register(Arc::new(PolarLoader::new("hrv"))).unwrap_err();
    assert!(matches!(err, MergeError::Config(ref msg) if msg.contains("hrv")));
    assert_eq!(registry.len(), 4);
}

#[test]
fn toml_overrides_reshape_sources() {
    let config = MergeConfig::from_toml_str(
        r#"
gap_threshold = 15

[[sources]]
name = "tymewear"
priority = 5

[[sources.columns]]
source = "VE"
fallback = "zero_default"
fallback_value = 0.0

[[sources.columns]]
source = "FeO2"
output = "feo2"
fallback = "preserve_missing"
"#,
    )
    .unwrap();
    assert_eq!(config.gap_threshold, 15);

    let registry = LoaderRegistry::with_defaults(&config).unwrap();
    assert_eq!(registry.list_sources(), vec!["wahoo", "tymewear", "trainred", "garmin"]);

    let tymewear = registry.get("tymewear").unwrap();
    let descriptor = tymewear.descriptor();
    let spec = |source: &str| descriptor.columns.iter().find(|c| c.source == source).unwrap();
    assert_eq!(spec("VE").fallback, FallbackPolicy::ZeroDefault(0.0));
    assert_eq!(spec("FeO2").output, "feo2");
    assert_eq!(descriptor.required_columns().len(), 2);
}

#[test]
fn override_for_unknown_source_is_rejected() {
    let config = MergeConfig::from_toml_str(
        r#"
[[sources]]
name = "suunto"
priority = 3
"#,
    )
    .unwrap();
    let err = LoaderRegistry::with_defaults(&config).err().unwrap();
    assert!(matches!(err, MergeError::Config(ref msg) if msg.contains("suunto")));
}
