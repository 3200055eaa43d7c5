//! Runs the stages of one pipeline run in order.
//!
//! `Ingest → (Enrich ∥ PersistQuarantine) → UploadPoints → UploadPolygons →
//! CountOverlaps → MergeAndPersist → Done`
//!
//! Once ingestion has succeeded, a failure in any later stage still leaves a
//! quarantine file and a partial enriched dataset on disk, with every key
//! that was not computed flagged.

mod stage;
mod upload;

pub use stage::{RunSummary, Stage};
pub use upload::await_completion;

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::enrich::{IsochroneEnricher, OverlapCounter};
use crate::error::{ConfigurationError, PipelineError, UploadError};
use crate::ingestion::{read_records, write_quarantine, IngestionPipeline};
use crate::models::{
    EnrichedDataset, FlaggedKey, OverlapResult, PointCollection, QuarantineRecord, RawRecord,
};
use crate::notify::RunNotifier;
use crate::providers::{DatasetStore, IsochroneProvider, SpatialQueryProvider, UploadTicket};
use crate::spatial::PolygonIndex;

/// Allowed run prefixes. Prefixes become part of dataset labels.
pub const PREFIX_PATTERN: &str = "^[A-Za-z0-9_-]{1,32}$";

pub fn validate_prefix(prefix: &str) -> Result<(), ConfigurationError> {
    let pattern = Regex::new(PREFIX_PATTERN)
        .map_err(|e| ConfigurationError(format!("invalid prefix pattern: {}", e)))?;
    if pattern.is_match(prefix) {
        Ok(())
    } else {
        Err(ConfigurationError(format!(
            "prefix '{}' must match {}",
            prefix, PREFIX_PATTERN
        )))
    }
}

pub fn points_label(prefix: &str) -> String {
    format!("{}_points", prefix)
}

pub fn polygons_label(prefix: &str) -> String {
    format!("{}_polygons", prefix)
}

/// A stage failure together with whatever overlap results exist so far.
struct StageFailure {
    stage: Stage,
    source: anyhow::Error,
    partial: Vec<OverlapResult>,
}

impl StageFailure {
    fn new(stage: Stage, source: impl Into<anyhow::Error>) -> Self {
        Self {
            stage,
            source: source.into(),
            partial: Vec::new(),
        }
    }
}

pub struct PipelineOrchestrator {
    config: Config,
    isochrones: Arc<dyn IsochroneProvider>,
    spatial: Arc<dyn SpatialQueryProvider>,
    store: Arc<dyn DatasetStore>,
    notifier: Option<RunNotifier>,
    progress_style: Option<ProgressStyle>,
}

impl PipelineOrchestrator {
    pub fn new(
        config: Config,
        isochrones: Arc<dyn IsochroneProvider>,
        spatial: Arc<dyn SpatialQueryProvider>,
        store: Arc<dyn DatasetStore>,
    ) -> Self {
        let notifier = config
            .notify
            .as_ref()
            .map(|n| RunNotifier::new(n.webhook_url.clone()));
        Self {
            config,
            isochrones,
            spatial,
            store,
            notifier,
            progress_style: None,
        }
    }

    /// Show per-point progress for enrichment and counting.
    pub fn with_progress_style(mut self, style: ProgressStyle) -> Self {
        self.progress_style = Some(style);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn progress_bar(&self, message: &'static str) -> ProgressBar {
        match &self.progress_style {
            Some(style) => ProgressBar::new(0)
                .with_style(style.clone())
                .with_message(message),
            None => ProgressBar::hidden(),
        }
    }

    /// Run the pipeline on the configured input file.
    pub async fn run(&self, prefix: &str) -> Result<RunSummary, PipelineError> {
        validate_prefix(prefix)?;
        let input = &self.config.paths.input;
        info!("Reading records from {}", input.display());
        let records = read_records(input).map_err(|e| PipelineError::stage(Stage::Ingest, e))?;
        self.run_records(prefix, records).await
    }

    /// Run the pipeline on records already in memory.
    pub async fn run_records(
        &self,
        prefix: &str,
        records: Vec<RawRecord>,
    ) -> Result<RunSummary, PipelineError> {
        validate_prefix(prefix)?;
        let mut summary = RunSummary::new(prefix);
        summary.records_read = records.len();

        let report = IngestionPipeline::new(self.config.region).ingest(records);
        summary.record(Stage::Ingest, report.elapsed);
        summary.accepted = report.points.len();
        summary.quarantined = report.quarantine.len();
        let points = report.points;

        if let Some(notifier) = &self.notifier {
            notifier.started(prefix, points.len()).await;
        }

        let mut flagged = Vec::new();
        let results = if points.is_empty() {
            warn!("No records accepted; skipping remote stages");
            self.persist_quarantine(&report.quarantine, &mut summary)
                .map(|_| Vec::new())
                .map_err(|e| StageFailure::new(Stage::PersistQuarantine, e))
        } else {
            self.remote_stages(prefix, &points, &report.quarantine, &mut summary, &mut flagged)
                .await
        };

        let results = match results {
            Ok(results) => results,
            Err(failure) => {
                return Err(self.fail(prefix, &points, failure, flagged, &mut summary).await)
            }
        };

        let started = Instant::now();
        let dataset = EnrichedDataset::merge(&points, &results, flagged);
        if !dataset.is_aligned() {
            let failure = StageFailure::new(
                Stage::MergeAndPersist,
                anyhow::anyhow!("merged arrays have different lengths"),
            );
            return Err(self.fail(prefix, &points, failure, Vec::new(), &mut summary).await);
        }
        if let Err(e) = write_dataset(&self.config.paths.output, &dataset) {
            let failure = StageFailure::new(Stage::MergeAndPersist, e);
            return Err(self.fail(prefix, &points, failure, Vec::new(), &mut summary).await);
        }
        summary.flagged = dataset.flagged.len();
        summary.output = Some(self.config.paths.output.clone());
        summary.record(Stage::MergeAndPersist, started.elapsed());

        info!(
            "Wrote enriched dataset to {}",
            self.config.paths.output.display()
        );
        info!("Run {} done\n{}", prefix, summary);
        if let Some(notifier) = &self.notifier {
            notifier.finished(prefix, &summary.to_string()).await;
        }
        Ok(summary)
    }

    /// Everything between ingestion and the final merge.
    async fn remote_stages(
        &self,
        prefix: &str,
        points: &PointCollection,
        quarantine: &[QuarantineRecord],
        summary: &mut RunSummary,
        flagged: &mut Vec<FlaggedKey>,
    ) -> Result<Vec<OverlapResult>, StageFailure> {
        // Enrich ∥ PersistQuarantine
        let iso = &self.config.isochrone;
        let enricher = IsochroneEnricher::new(Arc::clone(&self.isochrones))
            .with_rate_limit(iso.requests_per_minute, iso.concurrency)
            .with_retry(self.config.retry.to_policy())
            .with_timeout(iso.timeout())
            .with_policy(self.config.on_failure)
            .with_progress(self.progress_bar("isochrones"));

        let started = Instant::now();
        let quarantine_path = self.config.paths.quarantine.clone();
        let quarantine = quarantine.to_vec();
        let (enriched, persisted) = tokio::join!(
            enricher.enrich(points),
            tokio::task::spawn_blocking(move || {
                let started = Instant::now();
                write_quarantine(&quarantine_path, &quarantine).map(|_| started.elapsed())
            })
        );
        let persisted = persisted
            .context("Quarantine writer panicked")
            .and_then(|written| written);

        match persisted {
            Ok(elapsed) => summary.record(Stage::PersistQuarantine, elapsed),
            Err(e) => return Err(StageFailure::new(Stage::PersistQuarantine, e)),
        }
        let outcome = enriched.map_err(|e| StageFailure::new(Stage::Enrich, e))?;
        summary.record(Stage::Enrich, started.elapsed());
        summary.polygons = outcome.polygons.len();
        summary.enrichment_failures = outcome.failures.len();

        for failure in &outcome.failures {
            flagged.push(FlaggedKey {
                key: failure.key().to_string(),
                stage: Stage::Enrich.to_string(),
                reason: failure.to_string(),
            });
        }
        if outcome.polygons.is_empty() {
            return Err(StageFailure::new(
                Stage::Enrich,
                anyhow::anyhow!("no point produced isochrones"),
            ));
        }

        // Uploads
        let started = Instant::now();
        self.upload(&points_label(prefix), &points.to_document())
            .await
            .map_err(|e| StageFailure::new(Stage::UploadPoints, e))?;
        summary.record(Stage::UploadPoints, started.elapsed());

        let started = Instant::now();
        self.upload(&polygons_label(prefix), &outcome.polygons.to_geojson())
            .await
            .map_err(|e| StageFailure::new(Stage::UploadPolygons, e))?;
        summary.record(Stage::UploadPolygons, started.elapsed());

        // CountOverlaps
        let started = Instant::now();
        let overlap = &self.config.overlap;
        let mut counter = OverlapCounter::new(
            Arc::clone(&self.spatial),
            self.config.polygon_tileset(prefix),
            overlap.limit,
        )
        .with_rate_limit(overlap.requests_per_minute, overlap.concurrency)
        .with_retry(self.config.retry.to_policy())
        .with_timeout(overlap.timeout())
        .with_policy(self.config.on_failure)
        .with_progress(self.progress_bar("overlaps"))
        .exclude_keys(outcome.failed_keys());
        if overlap.verify_layer {
            counter = counter.with_reference(Arc::new(PolygonIndex::from_collection(
                &outcome.polygons,
            )));
        }

        let results = counter.count_overlaps(points).await.map_err(|aborted| StageFailure {
            stage: Stage::CountOverlaps,
            partial: aborted.partial.clone(),
            source: aborted.into(),
        })?;
        summary.record(Stage::CountOverlaps, started.elapsed());
        summary.counted = results.iter().filter(|r| !r.is_failed()).count();
        summary.anomalies = results.iter().filter(|r| r.is_anomalous()).count();
        summary.count_failures = results.iter().filter(|r| r.is_failed()).count();

        Ok(results)
    }

    async fn upload(&self, label: &str, payload: &serde_json::Value) -> Result<()> {
        let upload = &self.config.upload;
        let (result, attempts) = self
            .config
            .retry
            .to_policy()
            .run(&format!("Upload of '{}'", label), upload.timeout(), || {
                self.store.upload(label, payload)
            })
            .await;
        let ticket: UploadTicket =
            result.map_err(|e| UploadError::from_provider(label, e, attempts))?;
        info!("Upload '{}' accepted as {}", label, ticket.id);
        await_completion(
            self.store.as_ref(),
            &ticket,
            upload.poll_interval(),
            upload.timeout(),
            upload.max_polls,
        )
        .await?;
        Ok(())
    }

    fn persist_quarantine(
        &self,
        quarantine: &[QuarantineRecord],
        summary: &mut RunSummary,
    ) -> Result<()> {
        let started = Instant::now();
        write_quarantine(&self.config.paths.quarantine, quarantine)?;
        summary.record(Stage::PersistQuarantine, started.elapsed());
        Ok(())
    }

    /// Flush a partial dataset and report the failing stage.
    async fn fail(
        &self,
        prefix: &str,
        points: &PointCollection,
        failure: StageFailure,
        flagged: Vec<FlaggedKey>,
        summary: &mut RunSummary,
    ) -> PipelineError {
        error!("Run {} failed during {}: {:#}", prefix, failure.stage, failure.source);

        let dataset = EnrichedDataset::merge(points, &failure.partial, flagged);
        summary.flagged = dataset.flagged.len();
        match write_dataset(&self.config.paths.output, &dataset) {
            Ok(()) => {
                summary.output = Some(self.config.paths.output.clone());
                warn!(
                    "Wrote partial dataset with {} flagged keys to {}",
                    dataset.flagged.len(),
                    self.config.paths.output.display()
                );
            }
            Err(e) => error!("Could not write partial dataset: {:#}", e),
        }

        if let Some(notifier) = &self.notifier {
            notifier
                .failed(prefix, &format!("{}: {:#}", failure.stage, failure.source))
                .await;
        }
        PipelineError::stage(failure.stage, failure.source)
    }
}

/// Write the dataset as JSON, creating parent directories.
pub fn write_dataset(path: &Path, dataset: &EnrichedDataset) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer(BufWriter::new(file), dataset)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
