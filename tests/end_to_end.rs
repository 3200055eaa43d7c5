//! Drives the orchestrator end to end with in-memory providers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tempfile::TempDir;

use isoverlap::config::{Config, RetryConfig};
use isoverlap::enrich::FailurePolicy;
use isoverlap::error::ProviderError;
use isoverlap::models::{EnrichedDataset, Horizon, IsochronePair, PolygonFeature, RawRecord};
use isoverlap::providers::{
    DatasetStore, IsochroneProvider, PolygonRef, SpatialQuery, SpatialQueryProvider,
    UploadStatus, UploadTicket,
};
use isoverlap::{PipelineOrchestrator, Stage};

fn square(lon: f64, lat: f64, half_width: f64) -> Value {
    json!({
        "type": "Polygon",
        "coordinates": [[
            [lon - half_width, lat - half_width],
            [lon + half_width, lat - half_width],
            [lon + half_width, lat + half_width],
            [lon - half_width, lat + half_width],
            [lon - half_width, lat - half_width]
        ]]
    })
}

fn feature(horizon: Horizon, minutes: u32, geometry: Value) -> PolygonFeature {
    PolygonFeature {
        source_key: String::new(),
        horizon,
        minutes,
        color: "6706ce".to_string(),
        geometry,
        properties: Map::new(),
    }
}

/// Square isochrones: 0.01 degrees for the short horizon, 0.02 for the long.
/// Fails for one latitude when asked to.
struct SquareIsochrones {
    fail_lat: Option<f64>,
}

#[async_trait]
impl IsochroneProvider for SquareIsochrones {
    async fn fetch(&self, lon: f64, lat: f64) -> Result<IsochronePair, ProviderError> {
        if self.fail_lat == Some(lat) {
            return Err(ProviderError::Failure("422 no route".into()));
        }
        Ok(IsochronePair {
            short: feature(Horizon::Short, 5, square(lon, lat, 0.01)),
            long: feature(Horizon::Long, 10, square(lon, lat, 0.02)),
        })
    }
}

/// Dataset store that keeps uploads in memory and answers covering queries
/// against them, standing in for the tiling service and tilequery together.
#[derive(Default)]
struct InMemoryLayers {
    datasets: Mutex<HashMap<String, Value>>,
    reject_label: Option<String>,
    never_completes: bool,
    /// Upload calls still to answer with 429
    throttled_uploads: Mutex<u32>,
}

impl InMemoryLayers {
    fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.datasets.lock().unwrap().keys().cloned().collect();
        labels.sort();
        labels
    }
}

/// Axis-aligned ring bounds; the stub only ever stores squares.
fn covers(geometry: &Value, lon: f64, lat: f64) -> bool {
    let ring = match geometry.pointer("/coordinates/0").and_then(Value::as_array) {
        Some(ring) => ring,
        None => return false,
    };
    let xs: Vec<f64> = ring.iter().filter_map(|c| c[0].as_f64()).collect();
    let ys: Vec<f64> = ring.iter().filter_map(|c| c[1].as_f64()).collect();
    let (min_x, max_x) = xs.iter().fold((f64::MAX, f64::MIN), |(a, b), x| (a.min(*x), b.max(*x)));
    let (min_y, max_y) = ys.iter().fold((f64::MAX, f64::MIN), |(a, b), y| (a.min(*y), b.max(*y)));
    lon >= min_x && lon <= max_x && lat >= min_y && lat <= max_y
}

#[async_trait]
impl DatasetStore for InMemoryLayers {
    async fn upload(&self, label: &str, payload: &Value) -> Result<UploadTicket, ProviderError> {
        {
            let mut throttled = self.throttled_uploads.lock().unwrap();
            if *throttled > 0 {
                *throttled -= 1;
                return Err(ProviderError::RateLimited { retry_after: None });
            }
        }
        if self.reject_label.as_deref() == Some(label) {
            return Err(ProviderError::Failure("quota exceeded".to_string()));
        }
        self.datasets
            .lock()
            .unwrap()
            .insert(label.to_string(), payload.clone());
        Ok(UploadTicket {
            label: label.to_string(),
            id: format!("job-{}", label),
        })
    }

    async fn status(&self, _ticket: &UploadTicket) -> Result<UploadStatus, ProviderError> {
        Ok(UploadStatus {
            complete: !self.never_completes,
            ..Default::default()
        })
    }
}

#[async_trait]
impl SpatialQueryProvider for InMemoryLayers {
    async fn query(&self, query: &SpatialQuery) -> Result<Vec<PolygonRef>, ProviderError> {
        let label = query
            .layer
            .strip_prefix("someone.")
            .ok_or_else(|| ProviderError::Failure(format!("unknown tileset {}", query.layer)))?;
        let datasets = self.datasets.lock().unwrap();
        let layer = datasets
            .get(label)
            .ok_or_else(|| ProviderError::Failure(format!("no such layer {}", label)))?;

        let features = layer["features"].as_array().cloned().unwrap_or_default();
        Ok(features
            .iter()
            .filter(|f| covers(&f["geometry"], query.lon, query.lat))
            .take(query.limit)
            .map(|f| PolygonRef {
                id: None,
                properties: f["properties"].as_object().cloned().unwrap_or_default(),
            })
            .collect())
    }
}

fn config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.mapbox.username = Some("someone".to_string());
    config.mapbox.token = Some("pk.test".to_string());
    config.paths.input = dir.path().join("input.csv");
    config.paths.quarantine = dir.path().join("bad_data.csv");
    config.paths.output = dir.path().join("out").join("enriched.json");
    config.isochrone.requests_per_minute = 60_000;
    config.overlap.requests_per_minute = 60_000;
    config.upload.poll_interval_secs = 0;
    config.upload.max_polls = 3;
    config.retry = RetryConfig {
        max_retries: 1,
        base_delay_ms: 0,
        max_delay_ms: 0,
        backoff_multiplier: 1.0,
    };
    config
}

/// Answers only once the quarantine file exists, so enrichment can only
/// finish if the quarantine is persisted alongside it.
struct AfterQuarantine {
    path: PathBuf,
}

#[async_trait]
impl IsochroneProvider for AfterQuarantine {
    async fn fetch(&self, lon: f64, lat: f64) -> Result<IsochronePair, ProviderError> {
        for _ in 0..200 {
            if self.path.exists() {
                return SquareIsochrones { fail_lat: None }.fetch(lon, lat).await;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Err(ProviderError::Failure("quarantine never written".into()))
    }
}

fn orchestrator(
    config: Config,
    isochrones: impl IsochroneProvider + 'static,
    layers: Arc<InMemoryLayers>,
) -> PipelineOrchestrator {
    PipelineOrchestrator::new(
        config,
        Arc::new(isochrones),
        Arc::clone(&layers) as Arc<dyn SpatialQueryProvider>,
        layers,
    )
}

fn read_output(path: &Path) -> EnrichedDataset {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn three_rows() -> Vec<RawRecord> {
    vec![
        RawRecord::new("17", "41.8", "-87.6"),
        RawRecord::new("18", "N/A", "-87.7"),
        RawRecord::new("20", "42.5", "-88.5"),
    ]
}

#[tokio::test]
async fn test_three_rows_one_malformed() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let output = config.paths.output.clone();
    let quarantine = config.paths.quarantine.clone();
    let layers = Arc::new(InMemoryLayers::default());

    let summary = orchestrator(config, SquareIsochrones { fail_lat: None }, Arc::clone(&layers))
        .run_records("run1", three_rows())
        .await
        .unwrap();

    assert_eq!(summary.accepted, 2);
    assert_eq!(summary.quarantined, 1);
    assert_eq!(summary.polygons, 4);
    assert!(summary.elapsed(Stage::Ingest).is_some());
    assert!(summary.elapsed(Stage::CountOverlaps).is_some());

    let dataset = read_output(&output);
    assert!(dataset.is_aligned());
    assert_eq!(dataset.keys, vec!["17", "20"]);
    assert_eq!(dataset.coordinates, vec![[-87.6, 41.8], [-88.5, 42.5]]);
    assert_eq!(dataset.overlap, vec![Some(0), Some(0)]);
    assert!(dataset.flagged.is_empty());

    let bad = std::fs::read_to_string(&quarantine).unwrap();
    assert_eq!(bad, "Loc_key,Latitude,Longitude\n18,N/A,-87.7\n");

    assert_eq!(layers.labels(), vec!["run1_points", "run1_polygons"]);
}

#[tokio::test]
async fn test_neighbouring_points_overlap() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let output = config.paths.output.clone();
    let layers = Arc::new(InMemoryLayers::default());

    // 0.015 apart: inside each other's long square, outside the short ones
    let records = vec![
        RawRecord::new("a", "41.8", "-87.6"),
        RawRecord::new("b", "41.8", "-87.585"),
        RawRecord::new("c", "43.0", "-88.0"),
    ];
    orchestrator(config, SquareIsochrones { fail_lat: None }, layers)
        .run_records("run2", records)
        .await
        .unwrap();

    let dataset = read_output(&output);
    assert_eq!(dataset.overlap, vec![Some(1), Some(1), Some(0)]);
}

#[tokio::test]
async fn test_rejected_polygon_upload_flushes_partial_output() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let output = config.paths.output.clone();
    let quarantine = config.paths.quarantine.clone();
    let layers = Arc::new(InMemoryLayers {
        reject_label: Some("run1_polygons".to_string()),
        ..Default::default()
    });

    let err = orchestrator(config, SquareIsochrones { fail_lat: None }, layers)
        .run_records("run1", three_rows())
        .await
        .unwrap_err();

    assert_eq!(err.failed_stage(), Some(Stage::UploadPolygons));
    assert!(err.to_string().contains("quota exceeded"));

    let dataset = read_output(&output);
    assert!(dataset.is_aligned());
    assert_eq!(dataset.overlap, vec![None, None]);
    assert_eq!(dataset.flagged.len(), 2);
    assert!(quarantine.exists());
}

#[tokio::test]
async fn test_upload_that_never_completes_times_out() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let layers = Arc::new(InMemoryLayers {
        never_completes: true,
        ..Default::default()
    });

    let err = orchestrator(config, SquareIsochrones { fail_lat: None }, layers)
        .run_records("run1", three_rows())
        .await
        .unwrap_err();

    assert_eq!(err.failed_stage(), Some(Stage::UploadPoints));
    assert!(err.to_string().contains("not complete after 3 status polls"));
}

#[tokio::test]
async fn test_throttled_upload_is_retried() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let output = config.paths.output.clone();
    let layers = Arc::new(InMemoryLayers {
        throttled_uploads: Mutex::new(1),
        ..Default::default()
    });

    orchestrator(config, SquareIsochrones { fail_lat: None }, Arc::clone(&layers))
        .run_records("run1", three_rows())
        .await
        .unwrap();

    assert_eq!(*layers.throttled_uploads.lock().unwrap(), 0);
    assert_eq!(layers.labels(), vec!["run1_points", "run1_polygons"]);
    assert_eq!(read_output(&output).overlap, vec![Some(0), Some(0)]);
}

#[tokio::test]
async fn test_persistent_throttling_fails_upload() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let layers = Arc::new(InMemoryLayers {
        throttled_uploads: Mutex::new(10),
        ..Default::default()
    });

    let err = orchestrator(config, SquareIsochrones { fail_lat: None }, Arc::clone(&layers))
        .run_records("run1", three_rows())
        .await
        .unwrap_err();

    assert_eq!(err.failed_stage(), Some(Stage::UploadPoints));
    assert!(err.to_string().contains("rate limited after 2 attempts"));
    assert_eq!(*layers.throttled_uploads.lock().unwrap(), 8);
}

#[tokio::test]
async fn test_quarantine_written_while_enriching() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let output = config.paths.output.clone();
    let isochrones = AfterQuarantine {
        path: config.paths.quarantine.clone(),
    };

    let summary = orchestrator(config, isochrones, Arc::new(InMemoryLayers::default()))
        .run_records("run1", three_rows())
        .await
        .unwrap();

    assert_eq!(summary.enrichment_failures, 0);
    assert!(summary.elapsed(Stage::PersistQuarantine).is_some());
    assert_eq!(read_output(&output).overlap, vec![Some(0), Some(0)]);
}

#[tokio::test]
async fn test_skipped_point_stays_aligned_and_flagged() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir);
    config.on_failure = FailurePolicy::Skip;
    let output = config.paths.output.clone();
    let layers = Arc::new(InMemoryLayers::default());

    let summary = orchestrator(config, SquareIsochrones { fail_lat: Some(42.5) }, layers)
        .run_records("run1", three_rows())
        .await
        .unwrap();
    assert_eq!(summary.enrichment_failures, 1);

    let dataset = read_output(&output);
    assert!(dataset.is_aligned());
    assert_eq!(dataset.keys, vec!["17", "20"]);
    assert_eq!(dataset.overlap, vec![Some(0), None]);

    let stages: Vec<(&str, &str)> = dataset
        .flagged
        .iter()
        .map(|f| (f.key.as_str(), f.stage.as_str()))
        .collect();
    assert!(stages.contains(&("20", "enrich")));
    assert!(stages.contains(&("20", "count-overlaps")));
}

#[tokio::test]
async fn test_unreadable_input_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let output = config.paths.output.clone();
    let quarantine = config.paths.quarantine.clone();

    let err = orchestrator(
        config,
        SquareIsochrones { fail_lat: None },
        Arc::new(InMemoryLayers::default()),
    )
    .run("run1")
    .await
    .unwrap_err();

    assert_eq!(err.failed_stage(), Some(Stage::Ingest));
    assert!(!output.exists());
    assert!(!quarantine.exists());
}

#[tokio::test]
async fn test_run_reads_csv_input() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    std::fs::write(
        &config.paths.input,
        "Loc_key,Latitude,Longitude\n17,41.8,-87.6\n17,41.9,-87.6\n20,42.5,-88.5\n",
    )
    .unwrap();
    let output = config.paths.output.clone();

    let summary = orchestrator(
        config,
        SquareIsochrones { fail_lat: None },
        Arc::new(InMemoryLayers::default()),
    )
    .run("run1")
    .await
    .unwrap();

    assert_eq!(summary.records_read, 3);
    assert_eq!(summary.quarantined, 1);
    assert_eq!(read_output(&output).overlap, vec![Some(0), Some(0)]);
}

#[tokio::test]
async fn test_invalid_prefix_is_configuration_error() {
    let dir = TempDir::new().unwrap();
    let err = orchestrator(
        config(&dir),
        SquareIsochrones { fail_lat: None },
        Arc::new(InMemoryLayers::default()),
    )
    .run_records("bad prefix!", three_rows())
    .await
    .unwrap_err();
    assert_eq!(err.failed_stage(), None);
}
