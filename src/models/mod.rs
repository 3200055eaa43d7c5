//! Core data models for the overlap pipeline.

pub mod dataset;
pub mod point;
pub mod polygon;
pub mod record;

pub use dataset::{EnrichedDataset, FlaggedKey, OverlapOutcome, OverlapResult};
pub use point::{PointCollection, ValidatedPoint};
pub use polygon::{Horizon, IsochronePair, PolygonCollection, PolygonFeature};
pub use record::{QuarantineRecord, RawRecord};
