//! Pipeline stages and the per-run summary.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Stages in execution order. `Enrich` and `PersistQuarantine` run together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Ingest,
    Enrich,
    PersistQuarantine,
    UploadPoints,
    UploadPolygons,
    CountOverlaps,
    MergeAndPersist,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Enrich => "enrich",
            Stage::PersistQuarantine => "persist-quarantine",
            Stage::UploadPoints => "upload-points",
            Stage::UploadPolygons => "upload-polygons",
            Stage::CountOverlaps => "count-overlaps",
            Stage::MergeAndPersist => "merge-and-persist",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters and timings for one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub prefix: String,
    pub started_at: DateTime<Utc>,
    pub records_read: usize,
    pub accepted: usize,
    pub quarantined: usize,
    pub polygons: usize,
    pub enrichment_failures: usize,
    pub counted: usize,
    pub anomalies: usize,
    pub count_failures: usize,
    pub flagged: usize,
    pub timings: Vec<(Stage, Duration)>,
    pub output: Option<PathBuf>,
}

impl RunSummary {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            started_at: Utc::now(),
            records_read: 0,
            accepted: 0,
            quarantined: 0,
            polygons: 0,
            enrichment_failures: 0,
            counted: 0,
            anomalies: 0,
            count_failures: 0,
            flagged: 0,
            timings: Vec::new(),
            output: None,
        }
    }

    pub fn record(&mut self, stage: Stage, elapsed: Duration) {
        self.timings.push((stage, elapsed));
    }

    pub fn elapsed(&self, stage: Stage) -> Option<Duration> {
        self.timings
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, elapsed)| *elapsed)
    }

    pub fn total_elapsed(&self) -> Duration {
        self.timings.iter().map(|(_, elapsed)| *elapsed).sum()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} records read: {} accepted, {} quarantined",
            self.records_read, self.accepted, self.quarantined
        )?;
        writeln!(
            f,
            "{} isochrones built ({} points failed)",
            self.polygons, self.enrichment_failures
        )?;
        writeln!(
            f,
            "{} overlaps counted ({} anomalies, {} failed), {} keys flagged",
            self.counted, self.anomalies, self.count_failures, self.flagged
        )?;
        for (stage, elapsed) in &self.timings {
            writeln!(f, "  {:<20} {} ms", stage.as_str(), elapsed.as_millis())?;
        }
        write!(f, "total {} ms", self.total_elapsed().as_millis())
    }
}
