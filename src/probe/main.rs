//! One-off overlap query for a single coordinate against a published tileset.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use isoverlap::config::Config;
use isoverlap::mapbox::{MapboxClient, MapboxTilequery};
use isoverlap::models::{OverlapOutcome, OverlapResult};
use isoverlap::providers::{SpatialQuery, SpatialQueryProvider};

#[derive(Parser, Debug)]
#[command(name = "probe")]
#[command(about = "Count polygons covering one coordinate in a tileset")]
struct Args {
    /// Longitude
    #[arg(long, allow_hyphen_values = true)]
    lon: f64,

    /// Latitude
    #[arg(long, allow_hyphen_values = true)]
    lat: f64,

    /// Tileset id, e.g. username.run1_polygons
    #[arg(short, long)]
    tileset: String,

    /// Maximum matches to request
    #[arg(long, default_value = "50")]
    limit: usize,

    /// TOML configuration file (for the token)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Print every matched feature
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let config = if args.config.exists() {
        Config::load_from_file(&args.config)?
    } else {
        Config::from_toml("")?
    };
    let token = config
        .mapbox
        .token
        .as_deref()
        .context("No Mapbox token: set mapbox.token or MAPBOX_ACCESS_TOKEN")?;

    let client = MapboxClient::new(
        &config.mapbox.api_base,
        token,
        config.username(),
        Duration::from_secs(config.overlap.timeout_secs),
    )?;
    let tilequery = MapboxTilequery::new(std::sync::Arc::new(client));

    let limit = tilequery
        .max_limit()
        .map_or(args.limit, |cap| args.limit.min(cap));
    if limit < args.limit {
        warn!("Tilequery returns at most {} matches; using that instead of {}", limit, args.limit);
    }
    let query = SpatialQuery::covering(&args.tileset, args.lon, args.lat, limit);
    let matches = tilequery
        .query(&query)
        .await
        .with_context(|| format!("Tilequery against {} failed", args.tileset))?;

    if args.verbose {
        for (i, feature) in matches.iter().enumerate() {
            info!(
                "#{} id={} key={}",
                i,
                feature.id.as_deref().unwrap_or("-"),
                feature.source_key().unwrap_or("-")
            );
        }
    }
    let mut result = OverlapResult::from_matches(format!("{},{}", args.lon, args.lat), matches.len());
    if matches.len() >= limit {
        result.outcome = OverlapOutcome::Anomalous {
            raw_matches: matches.len(),
            reason: format!("result reached the query limit of {}; count may be capped", limit),
        };
    }
    info!("{} polygons cover ({}, {})", matches.len(), args.lon, args.lat);
    match result.overlap_count() {
        Some(count) if result.is_anomalous() => {
            warn!("Overlap {} is anomalous: {:?}", count, result.outcome)
        }
        Some(count) => info!("Overlap count: {}", count),
        None => warn!("No overlap count"),
    }
    Ok(())
}
