//! R-tree over isochrone polygons, answering the same zero-radius covering
//! query the hosted tileset does.

use std::sync::Arc;

use async_trait::async_trait;
use geo::{BoundingRect, Intersects, MultiPolygon, Point};
use rstar::{RTree, RTreeObject, AABB};
use serde_json::{json, Map};
use tracing::{info, warn};

use crate::error::ProviderError;
use crate::models::{Horizon, PolygonCollection, PolygonFeature};
use crate::providers::{GeometryFilter, PolygonRef, SpatialQuery, SpatialQueryProvider};

/// One isochrone feature in the tree.
#[derive(Debug, Clone)]
pub struct IndexedPolygon {
    pub source_key: Arc<str>,
    pub horizon: Horizon,
    pub geometry: MultiPolygon<f64>,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedPolygon {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

impl IndexedPolygon {
    /// `None` when the feature's geometry is not a usable polygon.
    pub fn new(feature: &PolygonFeature) -> Option<Self> {
        let geometry = MultiPolygon::new(feature.to_polygons().ok()?);
        let rect = geometry.bounding_rect()?;
        Some(Self {
            source_key: Arc::from(feature.source_key.as_str()),
            horizon: feature.horizon,
            geometry,
            envelope: AABB::from_corners(
                [rect.min().x, rect.min().y],
                [rect.max().x, rect.max().y],
            ),
        })
    }

    fn to_ref(&self) -> PolygonRef {
        let mut properties = Map::new();
        properties.insert("Loc_key".to_string(), json!(&*self.source_key));
        properties.insert("horizon".to_string(), json!(self.horizon));
        PolygonRef {
            id: Some(format!("{}:{}", self.source_key, self.horizon)),
            properties,
        }
    }
}

/// Spatial index over a [`PolygonCollection`].
pub struct PolygonIndex {
    tree: RTree<IndexedPolygon>,
}

impl PolygonIndex {
    pub fn from_collection(polygons: &PolygonCollection) -> Self {
        info!("Building spatial index for {} isochrones...", polygons.len());

        let mut skipped = 0;
        let indexed: Vec<IndexedPolygon> = polygons
            .features()
            .iter()
            .filter_map(|feature| {
                let indexed = IndexedPolygon::new(feature);
                if indexed.is_none() {
                    skipped += 1;
                }
                indexed
            })
            .collect();
        if skipped > 0 {
            warn!("{} isochrones had no usable polygon and were not indexed", skipped);
        }

        let tree = RTree::bulk_load(indexed);
        info!("Spatial index built with {} entries", tree.size());
        Self { tree }
    }

    /// All polygons covering `(lon, lat)`, boundary included.
    pub fn covering(&self, lon: f64, lat: f64) -> Vec<&IndexedPolygon> {
        let point = Point::new(lon, lat);
        let query_envelope = AABB::from_point([lon, lat]);

        // Envelope candidates first, then the exact test
        self.tree
            .locate_in_envelope_intersecting(&query_envelope)
            .filter(|ip| ip.geometry.intersects(&point))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

#[async_trait]
impl SpatialQueryProvider for PolygonIndex {
    /// The layer name is ignored: the index only ever holds one run's
    /// polygons.
    async fn query(&self, query: &SpatialQuery) -> Result<Vec<PolygonRef>, ProviderError> {
        if query.radius > 0.0 {
            return Err(ProviderError::Failure(format!(
                "local index only answers zero-radius queries, got {} m",
                query.radius
            )));
        }
        if query.geometry != GeometryFilter::Polygon {
            return Ok(Vec::new());
        }

        let mut matches: Vec<PolygonRef> = self
            .covering(query.lon, query.lat)
            .into_iter()
            .map(IndexedPolygon::to_ref)
            .collect();
        matches.truncate(query.limit);
        Ok(matches)
    }
}
