//! Full overlap pipeline: ingest, enrich, publish, count, merge.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::ProgressStyle;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use isoverlap::config::Config;
use isoverlap::enrich::FailurePolicy;
use isoverlap::mapbox::{MapboxClient, MapboxIsochrone, MapboxTilequery, MapboxTilesets};
use isoverlap::orchestrator::{validate_prefix, PipelineOrchestrator};

#[derive(Parser, Debug)]
#[command(name = "pipeline")]
#[command(about = "Count overlapping walking isochrones for a set of locations")]
struct Args {
    /// Run prefix; datasets are published as {prefix}_points and {prefix}_polygons
    #[arg(value_parser = parse_prefix)]
    prefix: String,

    /// TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Input CSV (Loc_key,Latitude,Longitude), optionally gzipped
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Where rejected rows are written
    #[arg(long)]
    quarantine: Option<PathBuf>,

    /// Where the enriched dataset is written
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Flag failing points and continue instead of aborting
    #[arg(long)]
    skip_failures: bool,

    /// Disable progress bars
    #[arg(long)]
    quiet: bool,
}

fn parse_prefix(s: &str) -> Result<String, String> {
    validate_prefix(s).map_err(|e| e.to_string())?;
    Ok(s.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let mut config = if args.config.exists() {
        Config::load_from_file(&args.config)?
    } else {
        info!(
            "No config at {}, using defaults and environment",
            args.config.display()
        );
        Config::from_toml("")?
    };
    if let Some(input) = args.input {
        config.paths.input = input;
    }
    if let Some(quarantine) = args.quarantine {
        config.paths.quarantine = quarantine;
    }
    if let Some(output) = args.output {
        config.paths.output = output;
    }
    if args.skip_failures {
        config.on_failure = FailurePolicy::Skip;
    }
    config.validate()?;

    info!("Overlap pipeline run {}", args.prefix);
    info!("Input: {}", config.paths.input.display());

    let timeout = config.isochrone.timeout().max(config.overlap.timeout());
    let client = Arc::new(
        MapboxClient::from_config(&config.mapbox, timeout)
            .context("Failed to set up Mapbox client")?,
    );
    let isochrones = Arc::new(MapboxIsochrone::new(Arc::clone(&client), &config.isochrone));
    let tilequery = Arc::new(MapboxTilequery::new(Arc::clone(&client)));
    let tilesets = Arc::new(MapboxTilesets::new(client));

    let mut orchestrator = PipelineOrchestrator::new(config, isochrones, tilequery, tilesets);
    if !args.quiet {
        orchestrator = orchestrator.with_progress_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})",
                )?
                .progress_chars("#>-"),
        );
    }

    let summary = orchestrator.run(&args.prefix).await?;
    if let Some(output) = &summary.output {
        info!("Enriched dataset: {}", output.display());
    }
    Ok(())
}
