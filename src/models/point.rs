//! Accepted points and the MultiPoint collection built from them.

use serde_json::json;

/// Geometry kind carried by every point collection.
pub const MULTI_POINT: &str = "MultiPoint";

/// A record that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPoint {
    pub key: String,
    pub lon: f64,
    pub lat: f64,
}

impl ValidatedPoint {
    pub fn new(key: impl Into<String>, lon: f64, lat: f64) -> Self {
        Self {
            key: key.into(),
            lon,
            lat,
        }
    }

    /// `[lon, lat]`, GeoJSON axis order
    pub fn coordinates(&self) -> [f64; 2] {
        [self.lon, self.lat]
    }
}

/// Accepted points in input order.
///
/// Keys and coordinate pairs are unique within a collection. Only ingestion
/// can append; everything downstream gets a read-only view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCollection {
    points: Vec<ValidatedPoint>,
}

impl PointCollection {
    pub(crate) fn push(&mut self, point: ValidatedPoint) {
        self.points.push(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[ValidatedPoint] {
        &self.points
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidatedPoint> {
        self.points.iter()
    }

    pub fn get(&self, index: usize) -> Option<&ValidatedPoint> {
        self.points.get(index)
    }

    /// Keys, aligned by position with [`coordinates`](Self::coordinates).
    pub fn keys(&self) -> Vec<&str> {
        self.points.iter().map(|p| p.key.as_str()).collect()
    }

    pub fn coordinates(&self) -> Vec<[f64; 2]> {
        self.points.iter().map(ValidatedPoint::coordinates).collect()
    }

    pub fn geometry_type(&self) -> &'static str {
        MULTI_POINT
    }

    /// MultiPoint document uploaded to the dataset store.
    pub fn to_document(&self) -> serde_json::Value {
        json!({
            "coordinates": self.coordinates(),
            "type": MULTI_POINT,
            "Loc_key": self.keys(),
        })
    }
}

impl<'a> IntoIterator for &'a PointCollection {
    type Item = &'a ValidatedPoint;
    type IntoIter = std::slice::Iter<'a, ValidatedPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}
