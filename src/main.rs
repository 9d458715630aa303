use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

use mowing_detector::config::parse_month_list;
use mowing_detector::cutting::CutTable;
use mowing_detector::io;
use mowing_detector::models::{SeriesInput, SeriesRow};
use mowing_detector::{CleanedSeries, CleaningPipeline, PipelineConfig};

#[derive(Parser, Debug)]
#[command(name = "mowing_detector")]
#[command(about = "Clean, smooth and detect mowing events in per-field NDVI time series", long_about = None)]
struct Cli {
    #[command(flatten)]
    overrides: ConfigArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// JSON configuration file; absent keys use defaults
    #[arg(long, global = true, env = "MOWING_CONFIG")]
    config: Option<PathBuf>,

    /// Expected fraction of outliers in the training table
    #[arg(long, global = true)]
    contamination: Option<f64>,

    /// Random seed for the isolation forest
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Valley drop threshold
    #[arg(long, global = true, allow_hyphen_values = true)]
    valley_threshold: Option<f64>,

    /// Savitzky-Golay window length (odd)
    #[arg(long, global = true)]
    window_length: Option<usize>,

    /// Savitzky-Golay polynomial order
    #[arg(long, global = true)]
    poly_order: Option<usize>,

    /// Cutting-event drop threshold
    #[arg(long, global = true, allow_hyphen_values = true)]
    cut_threshold: Option<f64>,

    /// Months excluded from cutting detection, e.g. "3,4"
    #[arg(long, global = true)]
    excluded_months: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Remove outliers, smooth and write the cleaned series
    Clean {
        #[arg(long)]
        training: PathBuf,
        #[arg(long)]
        target: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Also write the outlier-free series before smoothing
        #[arg(long)]
        raw_output: Option<PathBuf>,
    },
    /// Detect cutting dates from a series table
    Cuts {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Clean the target table and detect cutting dates on the smoothed series
    Run {
        #[arg(long)]
        training: PathBuf,
        #[arg(long)]
        target: PathBuf,
        #[arg(long)]
        series_output: PathBuf,
        #[arg(long)]
        cuts_output: PathBuf,
    },
}

impl ConfigArgs {
    fn resolve(&self) -> Result<PipelineConfig> {
        let config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config {:?}", path))?,
            None => PipelineConfig::default(),
        };
        let mut config = config.apply_env()?;

        if let Some(v) = self.contamination {
            config.anomaly.contamination = v;
        }
        if let Some(v) = self.seed {
            config.anomaly.seed = v;
        }
        if let Some(v) = self.valley_threshold {
            config.valley.drop_threshold = v;
        }
        if let Some(v) = self.window_length {
            config.smoothing.window_length = v;
        }
        if let Some(v) = self.poly_order {
            config.smoothing.poly_order = v;
        }
        if let Some(v) = self.cut_threshold {
            config.cutting.drop_threshold = v;
        }
        if let Some(raw) = &self.excluded_months {
            config.cutting.excluded_months = parse_month_list(raw)?;
        }
        Ok(config)
    }
}

fn clean(pipeline: &CleaningPipeline, training: &Path, target: &Path) -> Result<CleanedSeries> {
    let training_df = io::read_table(training)
        .with_context(|| format!("Failed to read training table {:?}", training))?;
    let target_df = io::read_table(target)
        .with_context(|| format!("Failed to read target table {:?}", target))?;
    info!(
        "Loaded training {:?} and target {:?}",
        training_df.shape(),
        target_df.shape()
    );

    let training_rows = io::observations_from_df(&training_df, "training")?;
    let target_rows = io::observations_from_df(&target_df, "target")?;
    Ok(pipeline.run(training_rows, target_rows)?)
}

fn write_series(rows: &[SeriesRow], path: &Path) -> Result<()> {
    let mut df = io::series_to_df(rows)?;
    io::write_table(&mut df, path).with_context(|| format!("Failed to write series {:?}", path))?;
    Ok(())
}

fn write_cuts(table: &CutTable, path: &Path) -> Result<()> {
    let mut df = io::cut_table_to_df(table)?;
    io::write_table(&mut df, path).with_context(|| format!("Failed to write cutting dates {:?}", path))?;
    info!("Saved cutting dates to {:?}", path);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mowing_detector=info".parse()?),
        )
        .init();

    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let start = Instant::now();
    let config = cli.overrides.resolve()?;
    let pipeline = CleaningPipeline::new(config).context("Invalid pipeline configuration")?;

    match cli.command {
        Command::Clean {
            training,
            target,
            output,
            raw_output,
        } => {
            let cleaned = clean(&pipeline, &training, &target)?;
            if let Some(path) = raw_output {
                write_series(&cleaned.raw_differences, &path)?;
                info!("Saved outlier-free series to {:?}", path);
            }
            write_series(&cleaned.smoothed, &output)?;
            info!("Saved smoothed series to {:?}", output);
        }
        Command::Cuts { input, output } => {
            let df = io::read_table(&input).with_context(|| format!("Failed to read series {:?}", input))?;
            let (input, skipped) = io::series_input_from_df(&df, "series")?;
            if skipped > 0 {
                info!("Skipped {} rows without NDVI", skipped);
            }
            let table = pipeline.detect_cuts(input)?;
            write_cuts(&table, &output)?;
        }
        Command::Run {
            training,
            target,
            series_output,
            cuts_output,
        } => {
            let cleaned = clean(&pipeline, &training, &target)?;
            write_series(&cleaned.smoothed, &series_output)?;
            info!("Saved smoothed series to {:?}", series_output);

            let table = pipeline.detect_cuts(SeriesInput::with_differences(cleaned.smoothed))?;
            write_cuts(&table, &cuts_output)?;
        }
    }

    info!("Finished in {:.2?}", start.elapsed());
    Ok(())
}
