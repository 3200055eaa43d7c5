//! Mapbox implementations of the provider traits.
//!
//! - Isochrone API for [`IsochroneProvider`](crate::providers::IsochroneProvider)
//! - Tilequery API for [`SpatialQueryProvider`](crate::providers::SpatialQueryProvider)
//! - Mapbox Tiling Service for [`DatasetStore`](crate::providers::DatasetStore)

pub mod client;
pub mod isochrone;
pub mod tilequery;
pub mod tilesets;

pub use client::MapboxClient;
pub use isochrone::MapboxIsochrone;
pub use tilequery::MapboxTilequery;
pub use tilesets::MapboxTilesets;
