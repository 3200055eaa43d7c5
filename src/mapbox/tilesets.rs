//! Mapbox Tiling Service as a [`DatasetStore`].
//!
//! An upload is three calls: replace the tileset source with line-delimited
//! GeoJSON, create the tileset if it does not exist yet, then publish it.
//! The publish job id is the ticket; its stage is the completion status.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::MapboxClient;
use crate::error::ProviderError;
use crate::providers::{DatasetStore, UploadStatus, UploadTicket};

/// Highest zoom the recipe tiles to. Isochrones are a few hundred meters
/// across, so z12 keeps them distinguishable.
const MAX_ZOOM: u8 = 12;

pub struct MapboxTilesets {
    client: Arc<MapboxClient>,
}

impl MapboxTilesets {
    pub fn new(client: Arc<MapboxClient>) -> Self {
        Self { client }
    }

    /// `{username}.{label}`
    pub fn tileset_id(&self, label: &str) -> String {
        format!("{}.{}", self.client.username(), label)
    }

    async fn replace_source(&self, label: &str, body: String) -> Result<(), ProviderError> {
        let url = self
            .client
            .endpoint(&["tilesets", "v1", "sources", self.client.username(), label])?;
        let part = Part::text(body).file_name(format!("{}.ldgeojson", label));
        let form = Form::new().part("file", part);

        let response = self
            .client
            .send_json(self.client.http().put(url).multipart(form))
            .await?;
        debug!("Replaced source {}: {}", label, response);
        Ok(())
    }

    async fn ensure_tileset(&self, label: &str) -> Result<(), ProviderError> {
        let tileset = self.tileset_id(label);
        let url = self.client.endpoint(&["tilesets", "v1", &tileset])?;
        let body = json!({
            "name": label,
            "recipe": recipe(self.client.username(), label),
        });

        match self
            .client
            .send_json(self.client.http().post(url).json(&body))
            .await
        {
            Ok(_) => {
                info!("Created tileset {}", tileset);
                Ok(())
            }
            Err(ProviderError::Failure(message)) if message.contains("already exists") => {
                debug!("Tileset {} already exists", tileset);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn publish(&self, label: &str) -> Result<String, ProviderError> {
        let tileset = self.tileset_id(label);
        let url = self
            .client
            .endpoint(&["tilesets", "v1", &tileset, "publish"])?;
        let body = self.client.send_json(self.client.http().post(url)).await?;

        body.get("jobId")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| ProviderError::Malformed(format!("publish response has no jobId: {}", body)))
    }
}

#[async_trait]
impl DatasetStore for MapboxTilesets {
    async fn upload(&self, label: &str, payload: &Value) -> Result<UploadTicket, ProviderError> {
        let body = to_line_delimited(payload)
            .map_err(|reason| ProviderError::Failure(format!("payload: {}", reason)))?;
        info!(
            "Uploading {} features to tileset source {}",
            body.lines().count(),
            label
        );

        self.replace_source(label, body)
            .await
            .map_err(|e| e.in_step("source upload"))?;
        self.ensure_tileset(label)
            .await
            .map_err(|e| e.in_step("tileset create"))?;
        let job_id = self
            .publish(label)
            .await
            .map_err(|e| e.in_step("publish"))?;

        info!("Publishing {} as job {}", self.tileset_id(label), job_id);
        Ok(UploadTicket {
            label: label.to_string(),
            id: job_id,
        })
    }

    async fn status(&self, ticket: &UploadTicket) -> Result<UploadStatus, ProviderError> {
        let tileset = self.tileset_id(&ticket.label);
        let url = self
            .client
            .endpoint(&["tilesets", "v1", &tileset, "jobs", &ticket.id])?;
        let body = self.client.send_json(self.client.http().get(url)).await?;
        parse_job_status(&body)
    }
}

/// Single-layer recipe reading from the source of the same name.
pub fn recipe(username: &str, label: &str) -> Value {
    let mut layers = serde_json::Map::new();
    layers.insert(
        label.to_string(),
        json!({
            "source": format!("mapbox://tileset-source/{}/{}", username, label),
            "minzoom": 0,
            "maxzoom": MAX_ZOOM,
        }),
    );
    json!({ "version": 1, "layers": layers })
}

/// Flatten a GeoJSON payload into one Feature per line.
///
/// A FeatureCollection yields its features; a MultiPoint document with a
/// parallel `Loc_key` array yields one Point feature per coordinate so every
/// point stays addressable by key. Any other geometry is wrapped as a
/// single feature.
pub fn to_line_delimited(payload: &Value) -> Result<String, String> {
    let kind = payload
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| "payload has no GeoJSON type".to_string())?;

    let features: Vec<Value> = match kind {
        "FeatureCollection" => payload
            .get("features")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| "FeatureCollection has no features array".to_string())?,
        "Feature" => vec![payload.clone()],
        "MultiPoint" => {
            let coordinates = payload
                .get("coordinates")
                .and_then(Value::as_array)
                .ok_or_else(|| "MultiPoint has no coordinates".to_string())?;
            let keys = payload.get("Loc_key").and_then(Value::as_array);
            if let Some(keys) = keys {
                if keys.len() != coordinates.len() {
                    return Err(format!(
                        "{} coordinates but {} keys",
                        coordinates.len(),
                        keys.len()
                    ));
                }
            }

            coordinates
                .iter()
                .enumerate()
                .map(|(i, coordinate)| {
                    let key = keys.and_then(|k| k.get(i)).cloned().unwrap_or(Value::Null);
                    json!({
                        "type": "Feature",
                        "geometry": { "type": "Point", "coordinates": coordinate },
                        "properties": { "Loc_key": key },
                    })
                })
                .collect()
        }
        _ => vec![json!({ "type": "Feature", "geometry": payload, "properties": {} })],
    };

    if features.is_empty() {
        return Err("payload has no features".to_string());
    }

    let mut lines = String::new();
    for feature in &features {
        lines.push_str(&feature.to_string());
        lines.push('\n');
    }
    Ok(lines)
}

/// Map an MTS job document onto [`UploadStatus`].
pub fn parse_job_status(body: &Value) -> Result<UploadStatus, ProviderError> {
    let stage = body
        .get("stage")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::Malformed(format!("job has no stage: {}", body)))?;

    match stage {
        "success" => Ok(UploadStatus {
            complete: true,
            error: None,
            progress: Some(1.0),
        }),
        "failed" => {
            let errors = body
                .get("errors")
                .filter(|e| e.as_array().map_or(false, |a| !a.is_empty()))
                .map(Value::to_string)
                .unwrap_or_else(|| "job failed".to_string());
            Ok(UploadStatus {
                complete: false,
                error: Some(errors),
                progress: None,
            })
        }
        "queued" | "processing" => Ok(UploadStatus {
            complete: false,
            error: None,
            progress: body.get("progress").and_then(Value::as_f64),
        }),
        other => Err(ProviderError::Malformed(format!("unknown job stage '{}'", other))),
    }
}
