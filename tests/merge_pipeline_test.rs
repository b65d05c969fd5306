use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use intervals_merge::config::MergeConfig;
use intervals_merge::error::MergeError;
use intervals_merge::pipeline::MergePipeline;
use intervals_merge::types::{IssueKind, Severity};

fn session_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

fn write(dir: &Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).unwrap();
}

fn wahoo(rows: usize) -> String {
    let mut text = String::from("secs,watts,cadence,heartrate\n");
    for i in 0..rows {
        text.push_str(&format!("{},{},{},{}\n", i, 200 + i, 90, 140 + i));
    }
    text
}

fn garmin(rows: usize, gap: Option<(usize, usize)>) -> String {
    let mut text = String::from("secs,hrv,skin_temperature,core_temperature\n");
    for i in 0..rows {
        let in_gap = gap.map_or(false, |(start, len)| i >= start && i < start + len);
        let hrv = if in_gap { String::new() } else { "45".to_string() };
        text.push_str(&format!("{},{},33.2,37.4\n", i, hrv));
    }
    text
}

fn trainred(seconds: usize) -> String {
    let mut text = String::from("Device,TrainRed\nSerial,TR-0042\n\nTimestamp (seconds passed),SmO2,THb unfiltered\n");
    for i in 0..seconds * 10 {
        let t = i as f64 / 10.0;
        text.push_str(&format!("{},{},{}\n", t, 60 + i / 10, 12.5));
    }
    text
}

fn tymewear(rows: usize) -> String {
    let mut text = String::from("Tymewear export\nAthlete,Test\nTime,BR,VT,VE\ns,bpm,L,L/min\n");
    for i in 0..rows {
        text.push_str(&format!("{},{},1.8,{}\n", i, 30, 50 + i));
    }
    text
}

fn config_for(dir: &Path) -> (MergeConfig, PathBuf) {
    let output = dir.join("out");
    let config = MergeConfig {
        input_dir: dir.join("in"),
        output_dir: output.clone(),
        ..MergeConfig::default()
    };
    std::fs::create_dir_all(&config.input_dir).unwrap();
    (config, output)
}

#[tokio::test]
async fn base_five_rows_with_auxiliary_four_rows_gives_four_rows() {
    let dir = tempfile::tempdir().unwrap();
    let (config, output) = config_for(dir.path());
    write(&config.input_dir, "ride_streams.csv", &wahoo(5));
    write(&config.input_dir, "watch_streams.csv", &garmin(4, None));
    let input = config.input_dir.clone();

    let pipeline = MergePipeline::from_config(config).unwrap();
    let result = pipeline.run_dir(&input, session_date()).await.unwrap();

    assert_eq!(result.row_count, 4);
    assert_eq!(result.rows_trimmed, 1);
    assert_eq!(
        result.table.column_names(),
        vec!["secs", "watts", "cadence", "heartrate", "skin_temperature", "core_temperature", "hrv"]
    );

    let path = output.join("Trening-01.05.2024-import.csv");
    assert_eq!(result.output_path.as_deref(), Some(path.as_path()));
    let written = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0], "secs,watts,cadence,heartrate,skin_temperature,core_temperature,hrv");
    assert_eq!(lines[1], "0,200,90,140,33.2,37.4,45");

    assert_eq!(result.contributions.len(), 2);
    assert!(result.contributions.iter().all(|c| c.digest.len() == 64));
}

#[tokio::test]
async fn all_four_sources_merge_in_priority_order() {
    let dir = tempfile::tempdir().unwrap();
    let (config, _) = config_for(dir.path());
    write(&config.input_dir, "ride_streams.csv", &wahoo(6));
    write(&config.input_dir, "session_01.csv", &trainred(6));
    write(&config.input_dir, "tyme_export.csv", &tymewear(5));
    write(&config.input_dir, "watch_streams.csv", &garmin(6, None));
    let input = config.input_dir.clone();

    let pipeline = MergePipeline::from_config(config).unwrap();
    let result = pipeline.run_dir(&input, session_date()).await.unwrap();

    assert_eq!(result.row_count, 5);
    assert_eq!(
        result.table.column_names(),
        vec![
            "secs",
            "watts",
            "cadence",
            "heartrate",
            "smo2",
            "THb",
            "TymeBreathRate",
            "tidal_volume",
            "TymeVentilation",
            "skin_temperature",
            "core_temperature",
            "hrv"
        ]
    );

    let smo2 = &result.table.column("smo2").unwrap().values;
    assert_eq!(smo2[0].as_f64(), Some(60.0));
    assert_eq!(smo2[4].as_f64(), Some(64.0));
    let sources: Vec<&str> = result.contributions.iter().map(|c| c.source.as_str()).collect();
    assert!(sources.contains(&"trainred"));
    assert!(sources.contains(&"tymewear"));
}

#[tokio::test]
async fn missing_base_is_fatal_and_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (config, output) = config_for(dir.path());
    write(&config.input_dir, "watch_streams.csv", &garmin(10, None));
    let input = config.input_dir.clone();

    let pipeline = MergePipeline::from_config(config).unwrap();
    let err = pipeline.run_dir(&input, session_date()).await.unwrap_err();

    assert!(matches!(err, MergeError::MissingBaseSource(ref name) if name == "wahoo"));
    assert!(!output.exists());
}

#[tokio::test]
async fn eleven_missing_values_block_the_merge() {
    let dir = tempfile::tempdir().unwrap();
    let (config, output) = config_for(dir.path());
    write(&config.input_dir, "ride_streams.csv", &wahoo(40));
    write(&config.input_dir, "watch_streams.csv", &garmin(40, Some((10, 11))));
    let input = config.input_dir.clone();

    let pipeline = MergePipeline::from_config(config).unwrap();
    let err = pipeline.run_dir(&input, session_date()).await.unwrap_err();

    match err {
        MergeError::GapExceeded {
            source_name,
            column,
            run_length,
            threshold,
        } => {
            assert_eq!(source_name, "garmin");
            assert_eq!(column, "hrv");
            assert_eq!(run_length, 11);
            assert_eq!(threshold, 10);
        }
        other => panic!("expected GapExceeded, got {other}"),
    }
    assert!(!output.exists());
}

#[tokio::test]
async fn gap_in_base_passthrough_column_blocks_the_merge() {
    let dir = tempfile::tempdir().unwrap();
    let (config, output) = config_for(dir.path());
    let mut ride = String::from("secs,watts,heartrate\n");
    for i in 0..40 {
        let watts = if (10..21).contains(&i) { String::new() } else { "210".to_string() };
        ride.push_str(&format!("{},{},150\n", i, watts));
    }
    write(&config.input_dir, "ride_streams.csv", &ride);
    let input = config.input_dir.clone();

    let pipeline = MergePipeline::from_config(config).unwrap();
    let err = pipeline.run_dir(&input, session_date()).await.unwrap_err();

    assert!(matches!(
        err,
        MergeError::GapExceeded { ref source_name, ref column, run_length: 11, threshold: 10 }
            if source_name == "wahoo" && column == "watts"
    ));
    assert!(!output.exists());
}

#[tokio::test]
async fn ten_missing_values_only_warn() {
    let dir = tempfile::tempdir().unwrap();
    let (config, _) = config_for(dir.path());
    write(&config.input_dir, "ride_streams.csv", &wahoo(40));
    write(&config.input_dir, "watch_streams.csv", &garmin(40, Some((10, 10))));
    let input = config.input_dir.clone();

    let pipeline = MergePipeline::from_config(config).unwrap();
    let result = pipeline.run_dir(&input, session_date()).await.unwrap();

    assert_eq!(result.row_count, 40);
    let gap = result
        .issues
        .iter()
        .find(|i| i.kind == IssueKind::Gap && i.column == "hrv")
        .unwrap();
    assert_eq!(gap.severity, Severity::Warning);
    assert_eq!(gap.run_length, 10);
    assert_eq!(gap.start_row, Some(10));
}

#[tokio::test]
async fn allow_gaps_overrides_blocking_issue() {
    let dir = tempfile::tempdir().unwrap();
    let (mut config, _) = config_for(dir.path());
    config.allow_gaps = true;
    write(&config.input_dir, "ride_streams.csv", &wahoo(40));
    write(&config.input_dir, "watch_streams.csv", &garmin(40, Some((10, 11))));
    let input = config.input_dir.clone();

    let pipeline = MergePipeline::from_config(config).unwrap();
    let result = pipeline.run_dir(&input, session_date()).await.unwrap();

    assert_eq!(result.row_count, 40);
    assert!(result.issues.iter().any(|i| i.is_blocking()));
}

#[tokio::test]
async fn dry_run_records_operations_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let (mut config, output) = config_for(dir.path());
    config.dry_run = true;
    write(&config.input_dir, "ride_streams.csv", &wahoo(3));
    let input = config.input_dir.clone();

    let pipeline = MergePipeline::from_config(config).unwrap();
    let result = pipeline.run_dir(&input, session_date()).await.unwrap();

    assert_eq!(result.row_count, 3);
    assert!(!output.exists());
    assert_eq!(result.operations.len(), 1);
    assert!(result.operations[0].contains("Trening-01.05.2024-import.csv"));
}

#[tokio::test]
async fn broken_auxiliary_source_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let (config, _) = config_for(dir.path());
    write(&config.input_dir, "ride_streams.csv", &wahoo(4));
    // Tymewear header present, but VE is mostly garbage
    write(
        &config.input_dir,
        "tyme_export.csv",
        "BR,VT,VE\n30,1.8,x\n30,1.8,y\n30,1.8,50\n",
    );
    let input = config.input_dir.clone();

    let pipeline = MergePipeline::from_config(config).unwrap();
    let result = pipeline.run_dir(&input, session_date()).await.unwrap();

    assert_eq!(result.row_count, 4);
    assert!(!result.table.has_column("TymeVentilation"));
    assert!(result
        .issues
        .iter()
        .any(|i| i.kind == IssueKind::ParseFailure && i.source == "tymewear"));
}

#[tokio::test]
async fn validate_reports_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let (config, output) = config_for(dir.path());
    write(&config.input_dir, "watch_streams.csv", &garmin(40, Some((5, 12))));
    let input = config.input_dir.clone();

    let pipeline = MergePipeline::from_config(config).unwrap();
    let report = pipeline.validate_dir(&input).await.unwrap();

    assert!(!report.base_found);
    assert_eq!(report.sources, vec!["garmin".to_string()]);
    assert!(report.has_blocking());
    assert!(!output.exists());
}
