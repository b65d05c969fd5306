use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use intervals_merge::config::MergeConfig;
use intervals_merge::logging;
use intervals_merge::observability;
use intervals_merge::pipeline::{LoaderRegistry, MergePipeline};
use intervals_merge::types::Severity;

#[derive(Parser)]
#[command(name = "intervals_merge")]
#[command(about = "Merge per-device training session exports into one per-second CSV")]
#[command(version = "0.1.0")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct RunArgs {
    /// Directory holding the exported CSV files
    #[arg(long)]
    input: Option<PathBuf>,
    /// Longest tolerated run of missing values per column
    #[arg(long)]
    gap_threshold: Option<usize>,
    /// Maximum concurrent file loads
    #[arg(long)]
    max_workers: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load, validate and merge all sources into one CSV
    Merge {
        #[command(flatten)]
        run: RunArgs,
        /// Directory for the merged CSV
        #[arg(long)]
        output: Option<PathBuf>,
        /// Report what would be written without writing
        #[arg(long)]
        dry_run: bool,
        /// Merge even when a gap exceeds the threshold
        #[arg(long)]
        allow_gaps: bool,
    },
    /// Load and validate all sources without merging
    Validate {
        #[command(flatten)]
        run: RunArgs,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List registered sources in load order
    Sources,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<MergeConfig> {
    let config = match path {
        Some(path) => MergeConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?
            .with_env_overrides()?,
        None => MergeConfig::from_env()?,
    };
    Ok(config)
}

fn apply_run_args(config: &mut MergeConfig, run: &RunArgs) {
    if let Some(input) = &run.input {
        config.input_dir = input.clone();
    }
    if let Some(threshold) = run.gap_threshold {
        config.gap_threshold = threshold;
    }
    if let Some(workers) = run.max_workers {
        config.max_workers = workers;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;

    logging::init_logging(&config.log_dir);
    observability::init_metrics();

    match cli.command {
        Commands::Merge {
            run,
            output,
            dry_run,
            allow_gaps,
        } => {
            apply_run_args(&mut config, &run);
            if let Some(output) = output {
                config.output_dir = output;
            }
            config.dry_run |= dry_run;
            config.allow_gaps |= allow_gaps;
            config.validate()?;

            let pipeline = MergePipeline::from_config(config)?;
            match pipeline.run().await {
                Ok(result) => {
                    println!("\n📊 Merge results (run {}):", result.run_id);
                    println!("   Rows: {} ({} trimmed)", result.row_count, result.rows_trimmed);
                    println!("   Columns: {}", result.column_count);
                    for contribution in &result.contributions {
                        println!(
                            "   {} <- {} ({} rows, sha256 {})",
                            contribution.source,
                            contribution.file,
                            contribution.rows,
                            &contribution.digest[..12.min(contribution.digest.len())]
                        );
                    }
                    if let Some(path) = &result.output_path {
                        println!("   Output file: {}", path.display());
                    }
                    if !result.issues.is_empty() {
                        println!("\n⚠️  Issues encountered:");
                        for issue in &result.issues {
                            println!("   - [{}] {} {}: {}", issue.severity, issue.source, issue.column, issue.message);
                        }
                    }
                    for op in &result.operations {
                        println!("   {}", op);
                    }
                }
                Err(e) => {
                    error!("Merge failed: {}", e);
                    println!("❌ Merge failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Validate { run, json } => {
            apply_run_args(&mut config, &run);
            config.validate()?;
            let input_dir = config.input_dir.clone();

            let pipeline = MergePipeline::from_config(config)?;
            let report = pipeline.validate_dir(&input_dir).await?;
            info!(issues = report.issues.len(), "Validation finished");

            if json {
                println!("{}", report.to_json()?);
                if report.has_blocking() || !report.base_found {
                    std::process::exit(2);
                }
                return Ok(());
            }

            println!("🔍 Sources found: {}", report.sources.join(", "));
            for issue in &report.issues {
                let marker = match issue.severity {
                    Severity::Blocking => "❌",
                    Severity::Warning => "⚠️ ",
                };
                println!("   {} {} {}: {}", marker, issue.source, issue.column, issue.message);
            }
            if report.has_blocking() || !report.base_found {
                std::process::exit(2);
            }
            println!("✅ No blocking issues");
        }
        Commands::Sources => {
            let registry = LoaderRegistry::with_defaults(&config)?;
            for descriptor in registry.ordered_descriptors() {
                let patterns: Vec<&str> = descriptor.detection.patterns.iter().map(|p| p.glob()).collect();
                println!(
                    "{:>3}  {:<9} {}  columns: {}  patterns: {}",
                    descriptor.priority,
                    descriptor.name,
                    if descriptor.is_base { "base" } else { "    " },
                    descriptor.output_names().join(", "),
                    if patterns.is_empty() { "(header only)".to_string() } else { patterns.join(", ") }
                );
            }
        }
    }
    Ok(())
}
