//! Capabilities the pipeline needs from external services.
//!
//! The orchestrator only talks to these traits. `crate::mapbox` holds the
//! HTTP implementations; `crate::spatial` has an in-memory query provider.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::ProviderError;
use crate::models::IsochronePair;

/// Computes reachability polygons around a coordinate.
#[async_trait]
pub trait IsochroneProvider: Send + Sync {
    /// Short and long horizon polygons for `(lon, lat)`. The returned
    /// features' `source_key` is filled in by the caller.
    async fn fetch(&self, lon: f64, lat: f64) -> Result<IsochronePair, ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryFilter {
    Polygon,
    LineString,
    Point,
}

impl GeometryFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryFilter::Polygon => "polygon",
            GeometryFilter::LineString => "linestring",
            GeometryFilter::Point => "point",
        }
    }
}

/// Which geometries in `layer` lie within `radius` meters of `(lon, lat)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialQuery {
    pub layer: String,
    pub lon: f64,
    pub lat: f64,
    pub radius: f64,
    pub geometry: GeometryFilter,
    pub limit: usize,
}

impl SpatialQuery {
    /// Zero-radius polygon query: what covers this exact point.
    pub fn covering(layer: impl Into<String>, lon: f64, lat: f64, limit: usize) -> Self {
        Self {
            layer: layer.into(),
            lon,
            lat,
            radius: 0.0,
            geometry: GeometryFilter::Polygon,
            limit,
        }
    }
}

/// One geometry matched by a spatial query. Only the count matters to the
/// overlap algorithm; the rest is kept for logging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolygonRef {
    pub id: Option<String>,
    pub properties: Map<String, Value>,
}

impl PolygonRef {
    pub fn source_key(&self) -> Option<&str> {
        self.properties.get("Loc_key").and_then(Value::as_str)
    }
}

#[async_trait]
pub trait SpatialQueryProvider: Send + Sync {
    async fn query(&self, query: &SpatialQuery) -> Result<Vec<PolygonRef>, ProviderError>;

    /// Largest `limit` the provider honours. Larger requests are capped.
    fn max_limit(&self) -> Option<usize> {
        None
    }
}

/// Handle returned by an accepted upload, used to poll for completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTicket {
    pub label: String,
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadStatus {
    pub complete: bool,
    /// Set when the store gave up processing the upload
    pub error: Option<String>,
    pub progress: Option<f64>,
}

/// Hosted store for named GeoJSON datasets.
#[async_trait]
pub trait DatasetStore: Send + Sync {
    /// Submit `payload` under `label`. Acceptance does not mean the data is
    /// queryable yet; poll [`status`](Self::status) for that. Must be safe to
    /// repeat, since throttled or timed out uploads are retried.
    async fn upload(&self, label: &str, payload: &Value) -> Result<UploadTicket, ProviderError>;

    async fn status(&self, ticket: &UploadTicket) -> Result<UploadStatus, ProviderError>;
}
