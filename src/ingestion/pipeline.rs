//! Drives raw records through validation and deduplication.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::dedup::Deduplicator;
use super::validator::{RecordValidator, RegionBounds};
use crate::error::RejectReason;
use crate::models::{PointCollection, QuarantineRecord, RawRecord};

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Default)]
pub struct IngestionReport {
    pub points: PointCollection,
    pub quarantine: Vec<QuarantineRecord>,
    pub elapsed: Duration,
}

impl IngestionReport {
    pub fn total(&self) -> usize {
        self.points.len() + self.quarantine.len()
    }
}

/// Single-use ingestion run. Owns its dedup state, so separate runs never
/// see each other's keys.
pub struct IngestionPipeline {
    validator: RecordValidator,
    dedup: Deduplicator,
    points: PointCollection,
    quarantine: Vec<QuarantineRecord>,
    started: Instant,
}

impl IngestionPipeline {
    pub fn new(bounds: RegionBounds) -> Self {
        Self {
            validator: RecordValidator::new(bounds),
            dedup: Deduplicator::new(),
            points: PointCollection::default(),
            quarantine: Vec::new(),
            started: Instant::now(),
        }
    }

    /// Process one record. A rejected record is quarantined with its raw
    /// strings and the reason is returned; ingestion can always continue.
    pub fn push(&mut self, raw: RawRecord) -> Result<(), RejectReason> {
        let checked = self
            .validator
            .validate(&raw)
            .and_then(|point| {
                self.dedup.check(&point.key, point.lon, point.lat)?;
                Ok(point)
            });

        match checked {
            Ok(point) => {
                self.points.push(point);
                Ok(())
            }
            Err(reason) => {
                warn!(
                    "Rejected {}: {} ({},{})",
                    raw.key, reason, raw.latitude, raw.longitude
                );
                self.quarantine.push(QuarantineRecord::from_raw(raw, reason));
                Err(reason)
            }
        }
    }

    pub fn finish(self) -> IngestionReport {
        let elapsed = self.started.elapsed();
        info!(
            "Ingested {} records: {} accepted, {} quarantined ({:.2} ms)",
            self.points.len() + self.quarantine.len(),
            self.points.len(),
            self.quarantine.len(),
            elapsed.as_secs_f64() * 1e3
        );
        IngestionReport {
            points: self.points,
            quarantine: self.quarantine,
            elapsed,
        }
    }

    /// Run a whole batch in input order.
    pub fn ingest<I>(mut self, records: I) -> IngestionReport
    where
        I: IntoIterator<Item = RawRecord>,
    {
        for record in records {
            // Rejections are already recorded in the quarantine
            let _ = self.push(record);
        }
        self.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ingest(records: Vec<RawRecord>) -> IngestionReport {
        IngestionPipeline::new(RegionBounds::default()).ingest(records)
    }

    #[test]
    fn test_duplicate_batch_yields_one_point() {
        let report = ingest(vec![
            RawRecord::new("20", "41.69", "-87.84"),
            RawRecord::new("20", "41.69", "-87.84"),
        ]);
        assert_eq!(report.points.len(), 1);
        assert_eq!(report.quarantine.len(), 1);
        assert_eq!(report.quarantine[0].reason, RejectReason::DuplicateKey);
    }

    #[test]
    fn test_quarantine_keeps_raw_strings() {
        let report = ingest(vec![
            RawRecord::new("44", "N/A", "-87.84"),
            RawRecord::new("45", "41.690", "-87.840"),
            RawRecord::new("46", "41.69", "-87.84"),
        ]);
        assert_eq!(report.points.keys(), vec!["45"]);
        assert_eq!(report.quarantine.len(), 2);

        let bad = &report.quarantine[0];
        assert_eq!(bad.key, "44");
        assert_eq!(bad.latitude_raw, "N/A");
        assert_eq!(bad.reason, RejectReason::NotNumeric);

        // Same numbers, different spelling: still the same coordinate
        let dup = &report.quarantine[1];
        assert_eq!(dup.latitude_raw, "41.69");
        assert_eq!(dup.reason, RejectReason::DuplicateCoordinate);
    }

    #[test]
    fn test_validation_runs_before_dedup() {
        // Row fails both validation and the key check; validation wins
        let report = ingest(vec![
            RawRecord::new("1", "41.69", "-87.84"),
            RawRecord::new("1", "garbage", "-87.84"),
        ]);
        assert_eq!(report.quarantine[0].reason, RejectReason::NotNumeric);
    }

    #[test]
    fn test_counts_add_up_and_order_is_kept() {
        let records = vec![
            RawRecord::new("c", "41.80", "-87.60"),
            RawRecord::new("a", "41.81", "-87.61"),
            RawRecord::new("x", "40.00", "-87.61"),
            RawRecord::new("b", "41.82", "-87.62"),
            RawRecord::new("a", "41.83", "-87.63"),
        ];
        let total = records.len();
        let report = ingest(records);

        assert_eq!(report.total(), total);
        assert_eq!(report.points.keys(), vec!["c", "a", "b"]);
        assert_eq!(report.points.geometry_type(), "MultiPoint");
    }

    #[test]
    fn test_runs_are_isolated() {
        let first = ingest(vec![RawRecord::new("20", "41.69", "-87.84")]);
        let second = ingest(vec![RawRecord::new("20", "41.69", "-87.84")]);
        assert_eq!(first.points.len(), 1);
        assert_eq!(second.points.len(), 1);
    }
}
