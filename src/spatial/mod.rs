//! In-memory spatial queries over this run's isochrones.

pub mod index;

pub use index::{IndexedPolygon, PolygonIndex};
