use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{error, info, info_span};

use gdsc_etl::config::{Config, PipelinePlan, SourceConfig};
use gdsc_etl::constants::DEFAULT_CONFIG_PATH;
use gdsc_etl::pipeline::ingestion::{write_raw_csv, CsvFileSource, RecordSource, SheetExportSource};
use gdsc_etl::pipeline::parquet_out::{read_batch_parquet, write_batch_parquet};
use gdsc_etl::pipeline::Pipeline;
use gdsc_etl::{logging, metrics};

#[derive(Parser)]
#[command(name = "gdsc_etl")]
#[command(about = "Extract, clean, validate and load GDSC drug-response data")]
#[command(version = "0.1.0")]
struct Cli {
    /// Stage to run
    #[arg(long, value_enum, default_value_t = Mode::All)]
    mode: Mode,

    /// Path to the TOML configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Extract,
    Transform,
    Validate,
    Load,
    All,
}

fn extract(source: &SourceConfig, pipeline: &Pipeline) -> Result<()> {
    let source: Box<dyn RecordSource> = match source {
        SourceConfig::SheetExport { file_id } if file_id.trim().is_empty() => {
            bail!("sheet_export source needs a file_id; set it in the config or GDSC_FILE_ID")
        }
        SourceConfig::SheetExport { file_id } => Box::new(SheetExportSource::new(file_id.clone())),
        SourceConfig::CsvFile { path } => Box::new(CsvFileSource::new(path.clone())),
        SourceConfig::None => bail!("no [source] configured; set one or GDSC_FILE_ID"),
    };
    info!("Extracting from {}", source.describe());

    let raw = source
        .fetch()
        .with_context(|| format!("failed to fetch {}", source.describe()))?;
    let raw_path = &pipeline.plan().paths.raw;
    write_raw_csv(&raw, raw_path)
        .with_context(|| format!("failed to write raw extract to {}", raw_path.display()))?;
    Ok(())
}

fn transform(pipeline: &Pipeline) -> Result<()> {
    let plan = pipeline.plan();
    let raw = CsvFileSource::new(plan.paths.raw.clone())
        .fetch()
        .with_context(|| format!("failed to read raw extract {}", plan.paths.raw.display()))?;
    let batch = pipeline.transform(raw)?;
    write_batch_parquet(&batch, &plan.schema, &plan.paths.processed).with_context(|| {
        format!("failed to write stage file {}", plan.paths.processed.display())
    })?;
    Ok(())
}

fn validate(pipeline: &Pipeline) -> Result<()> {
    let plan = pipeline.plan();
    let batch = read_batch_parquet(&plan.paths.processed, &plan.schema)
        .with_context(|| format!("failed to read stage file {}", plan.paths.processed.display()))?;
    pipeline.validate(&batch).into_result()?;
    Ok(())
}

fn load(pipeline: &Pipeline) -> Result<()> {
    let plan = pipeline.plan();
    let batch = read_batch_parquet(&plan.paths.processed, &plan.schema)
        .with_context(|| format!("failed to read stage file {}", plan.paths.processed.display()))?;
    let summary = pipeline.load_into_configured(&batch)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn run_mode(mode: Mode, source: &SourceConfig, pipeline: &Pipeline) -> Result<()> {
    match mode {
        Mode::Extract => extract(source, pipeline),
        Mode::Transform => transform(pipeline),
        Mode::Validate => validate(pipeline),
        Mode::Load => load(pipeline),
        Mode::All => {
            extract(source, pipeline)?;
            transform(pipeline)?;
            validate(pipeline)?;
            load(pipeline)
        }
    }
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    logging::init_logging();
    metrics::init_metrics();

    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    config.apply_overrides(|key| std::env::var(key).ok())?;
    let plan = PipelinePlan::from_config(&config).context("invalid pipeline configuration")?;
    let pipeline = Pipeline::new(plan);

    let span = info_span!("stage", mode = ?cli.mode);
    let _enter = span.enter();
    info!("Running {:?} stage", cli.mode);

    if let Err(e) = run_mode(cli.mode, &config.source, &pipeline) {
        error!("{:?} stage failed: {:#}", cli.mode, e);
        return Err(e);
    }
    info!("{:?} stage completed", cli.mode);
    Ok(())
}
