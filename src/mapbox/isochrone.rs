//! Mapbox Isochrone API.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::MapboxClient;
use crate::config::IsochroneConfig;
use crate::error::ProviderError;
use crate::models::{Horizon, IsochronePair, PolygonFeature};
use crate::providers::IsochroneProvider;

/// Requested contour for one horizon.
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    pub minutes: u32,
    /// Hex color without leading `#`
    pub color: String,
}

pub struct MapboxIsochrone {
    client: Arc<MapboxClient>,
    profile: String,
    short: Contour,
    long: Contour,
}

impl MapboxIsochrone {
    pub fn new(client: Arc<MapboxClient>, config: &IsochroneConfig) -> Self {
        Self {
            client,
            profile: config.profile.clone(),
            short: Contour {
                minutes: config.short_minutes,
                color: config.short_color.trim_start_matches('#').to_string(),
            },
            long: Contour {
                minutes: config.long_minutes,
                color: config.long_color.trim_start_matches('#').to_string(),
            },
        }
    }
}

#[async_trait]
impl IsochroneProvider for MapboxIsochrone {
    async fn fetch(&self, lon: f64, lat: f64) -> Result<IsochronePair, ProviderError> {
        let coordinates = format!("{},{}", lon, lat);
        let mut url = self.client.endpoint(&[
            "isochrone",
            "v1",
            "mapbox",
            &self.profile,
            &coordinates,
        ])?;
        url.query_pairs_mut()
            .append_pair(
                "contours_minutes",
                &format!("{},{}", self.short.minutes, self.long.minutes),
            )
            .append_pair(
                "contours_colors",
                &format!("{},{}", self.short.color, self.long.color),
            )
            .append_pair("polygons", "true");

        let body = self.client.send_json(self.client.http().get(url)).await?;
        select_horizons(&body, &self.short, &self.long)
    }
}

/// Pick the short and long features out of an isochrone FeatureCollection.
///
/// Features are matched on their `contour` property, so response order
/// does not matter. Both must be present.
pub fn select_horizons(
    body: &Value,
    short: &Contour,
    long: &Contour,
) -> Result<IsochronePair, ProviderError> {
    let features = body
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::Malformed("response has no features array".to_string()))?;

    let pick = |horizon: Horizon, contour: &Contour| -> Result<PolygonFeature, ProviderError> {
        let feature = features
            .iter()
            .find(|f| {
                f.pointer("/properties/contour").and_then(Value::as_u64)
                    == Some(contour.minutes as u64)
            })
            .ok_or_else(|| {
                ProviderError::Malformed(format!("missing {} minute contour", contour.minutes))
            })?;

        let geometry = feature
            .get("geometry")
            .filter(|g| !g.is_null())
            .cloned()
            .ok_or_else(|| {
                ProviderError::Malformed(format!("{} minute contour has no geometry", contour.minutes))
            })?;
        let properties = feature
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_else(Map::new);

        Ok(PolygonFeature {
            source_key: String::new(),
            horizon,
            minutes: contour.minutes,
            color: contour.color.clone(),
            geometry,
            properties,
        })
    };

    Ok(IsochronePair {
        short: pick(Horizon::Short, short)?,
        long: pick(Horizon::Long, long)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contours() -> (Contour, Contour) {
        (
            Contour {
                minutes: 5,
                color: "6706ce".to_string(),
            },
            Contour {
                minutes: 10,
                color: "04e813".to_string(),
            },
        )
    }

    fn feature(contour: u64) -> Value {
        json!({
            "type": "Feature",
            "properties": { "contour": contour, "color": "#6706ce", "fill-opacity": 0.33 },
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[-87.6, 41.8], [-87.5, 41.8], [-87.5, 41.9], [-87.6, 41.8]]]
            }
        })
    }

    #[test]
    fn test_matches_by_contour_not_order() {
        // Mapbox returns the largest contour first
        let body = json!({ "type": "FeatureCollection", "features": [feature(10), feature(5)] });
        let (short, long) = contours();
        let pair = select_horizons(&body, &short, &long).unwrap();

        assert_eq!(pair.short.horizon, Horizon::Short);
        assert_eq!(pair.short.minutes, 5);
        assert_eq!(pair.long.minutes, 10);
        assert_eq!(pair.long.color, "04e813");
        assert_eq!(pair.short.properties["fill-opacity"], 0.33);
        assert!(pair.short.to_polygons().is_ok());
    }

    #[test]
    fn test_missing_contour_is_malformed() {
        let body = json!({ "type": "FeatureCollection", "features": [feature(5)] });
        let (short, long) = contours();
        let err = select_horizons(&body, &short, &long).unwrap_err();
        assert_eq!(
            err,
            ProviderError::Malformed("missing 10 minute contour".to_string())
        );
    }

    #[test]
    fn test_no_features_is_malformed() {
        let (short, long) = contours();
        let err = select_horizons(&json!({ "message": "oops" }), &short, &long).unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }
}
