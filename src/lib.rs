//! isoverlap - walking-distance overlap counts for a set of locations.
//!
//! Reads location records, quarantines bad rows, builds short and long
//! isochrones per point, publishes points and polygons as tilesets, and
//! counts how many other points' isochrones cover each point.

pub mod config;
pub mod enrich;
pub mod error;
pub mod ingestion;
pub mod mapbox;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod providers;
pub mod retry;
pub mod spatial;

pub use config::Config;
pub use error::PipelineError;
pub use models::{EnrichedDataset, PointCollection, PolygonCollection};
pub use orchestrator::{PipelineOrchestrator, RunSummary, Stage};
