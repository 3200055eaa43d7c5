//! Isochrone polygons and the FeatureCollection assembled from them.

use geo::{MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Time horizon of an isochrone. Every point gets exactly one of each,
/// short first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Horizon {
    Short,
    Long,
}

impl Horizon {
    pub const ALL: [Horizon; 2] = [Horizon::Short, Horizon::Long];
}

impl std::fmt::Display for Horizon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Horizon::Short => write!(f, "short"),
            Horizon::Long => write!(f, "long"),
        }
    }
}

/// One reachability polygon produced for a point.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonFeature {
    /// Key of the point this isochrone was computed from
    pub source_key: String,
    pub horizon: Horizon,
    pub minutes: u32,
    /// Hex draw color without leading `#`
    pub color: String,
    /// GeoJSON geometry object as returned by the provider
    pub geometry: Value,
    /// Provider properties, passed through untouched
    pub properties: Map<String, Value>,
}

impl PolygonFeature {
    /// GeoJSON Feature with the source key and horizon merged into properties.
    pub fn to_geojson(&self) -> Value {
        let mut properties = self.properties.clone();
        properties.insert("Loc_key".to_string(), json!(self.source_key));
        properties.insert("horizon".to_string(), json!(self.horizon));
        properties.insert("contour".to_string(), json!(self.minutes));
        properties.insert("color".to_string(), json!(format!("#{}", self.color)));

        json!({
            "type": "Feature",
            "geometry": self.geometry,
            "properties": properties,
        })
    }

    /// Convert the geometry to `geo` polygons. Isochrones come back as either
    /// a Polygon or a MultiPolygon; anything else is an error.
    pub fn to_polygons(&self) -> Result<Vec<Polygon<f64>>, String> {
        let geometry = geojson::Geometry::from_json_value(self.geometry.clone())
            .map_err(|e| format!("invalid GeoJSON geometry: {}", e))?;
        let geometry = geo_types::Geometry::<f64>::try_from(geometry.value)
            .map_err(|e| format!("unsupported geometry: {}", e))?;

        match geometry {
            geo_types::Geometry::Polygon(p) => Ok(vec![p]),
            geo_types::Geometry::MultiPolygon(MultiPolygon(polys)) => Ok(polys),
            _ => Err("expected Polygon or MultiPolygon geometry".to_string()),
        }
    }
}

/// Both isochrones for one point, as returned by an isochrone provider.
#[derive(Debug, Clone, PartialEq)]
pub struct IsochronePair {
    pub short: PolygonFeature,
    pub long: PolygonFeature,
}

/// Isochrones for a whole run: two features per point, in point order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolygonCollection {
    features: Vec<PolygonFeature>,
}

impl PolygonCollection {
    pub(crate) fn push_pair(&mut self, pair: IsochronePair) {
        self.features.push(pair.short);
        self.features.push(pair.long);
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Number of points represented (each contributes two features).
    pub fn point_count(&self) -> usize {
        self.features.len() / 2
    }

    pub fn features(&self) -> &[PolygonFeature] {
        &self.features
    }

    pub fn features_for<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a PolygonFeature> {
        self.features.iter().filter(move |f| f.source_key == key)
    }

    pub fn to_geojson(&self) -> Value {
        json!({
            "type": "FeatureCollection",
            "features": self.features.iter().map(PolygonFeature::to_geojson).collect::<Vec<_>>(),
        })
    }
}
