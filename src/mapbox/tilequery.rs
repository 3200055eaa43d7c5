//! Mapbox Tilequery API.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::MapboxClient;
use crate::error::ProviderError;
use crate::providers::{PolygonRef, SpatialQuery, SpatialQueryProvider};

/// Most features a single tilequery call will return.
pub const MAX_LIMIT: usize = 50;

pub struct MapboxTilequery {
    client: Arc<MapboxClient>,
}

impl MapboxTilequery {
    pub fn new(client: Arc<MapboxClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SpatialQueryProvider for MapboxTilequery {
    async fn query(&self, query: &SpatialQuery) -> Result<Vec<PolygonRef>, ProviderError> {
        let position = format!("{},{}.json", query.lon, query.lat);
        let mut url = self
            .client
            .endpoint(&["v4", &query.layer, "tilequery", &position])?;

        let limit = query.limit.min(MAX_LIMIT);
        if limit < query.limit {
            debug!("Tilequery limit {} capped to {}", query.limit, MAX_LIMIT);
        }
        url.query_pairs_mut()
            .append_pair("radius", &query.radius.to_string())
            .append_pair("limit", &limit.to_string())
            .append_pair("geometry", query.geometry.as_str());

        let body = self.client.send_json(self.client.http().get(url)).await?;
        parse_features(&body)
    }

    fn max_limit(&self) -> Option<usize> {
        Some(MAX_LIMIT)
    }
}

/// Matched features of a tilequery FeatureCollection.
pub fn parse_features(body: &Value) -> Result<Vec<PolygonRef>, ProviderError> {
    let features = body
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::Malformed("response has no features array".to_string()))?;

    Ok(features
        .iter()
        .map(|feature| PolygonRef {
            id: feature.get("id").and_then(|id| match id {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }),
            properties: feature
                .get("properties")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        })
        .collect())
}
