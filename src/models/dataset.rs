//! Overlap results and the final enriched dataset.

use serde::{Deserialize, Serialize};

use super::point::{PointCollection, MULTI_POINT};

/// How many polygons in the queried layer are a point's own isochrones.
pub const SELF_POLYGONS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlapOutcome {
    /// Number of *other* points' isochrones covering this point
    Counted(usize),
    /// The raw match count cannot be explained by this run's layer contents.
    /// The count is still reported but flagged.
    Anomalous { raw_matches: usize, reason: String },
    /// No count could be obtained for this point
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlapResult {
    pub key: String,
    pub outcome: OverlapOutcome,
}

impl OverlapResult {
    /// Apply the self-overlap correction to a raw match count.
    ///
    /// Fewer than [`SELF_POLYGONS`] matches means the layer is missing this
    /// point's own isochrones; that is reported as an anomaly rather than a
    /// negative count.
    pub fn from_matches(key: impl Into<String>, raw_matches: usize) -> Self {
        let outcome = if raw_matches >= SELF_POLYGONS {
            OverlapOutcome::Counted(raw_matches - SELF_POLYGONS)
        } else {
            OverlapOutcome::Anomalous {
                raw_matches,
                reason: format!(
                    "only {} polygon(s) cover the point, expected at least its own {}",
                    raw_matches, SELF_POLYGONS
                ),
            }
        };
        Self {
            key: key.into(),
            outcome,
        }
    }

    pub fn failed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            outcome: OverlapOutcome::Failed {
                reason: reason.into(),
            },
        }
    }

    /// `raw_matches - 2`, which may be negative for anomalies. `None` when
    /// no count exists or it does not fit in an `i64`.
    pub fn overlap_count(&self) -> Option<i64> {
        match &self.outcome {
            OverlapOutcome::Counted(n) => i64::try_from(*n).ok(),
            OverlapOutcome::Anomalous { raw_matches, .. } => i64::try_from(*raw_matches)
                .ok()
                .map(|raw| raw - SELF_POLYGONS as i64),
            OverlapOutcome::Failed { .. } => None,
        }
    }

    pub fn is_anomalous(&self) -> bool {
        matches!(self.outcome, OverlapOutcome::Anomalous { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, OverlapOutcome::Failed { .. })
    }
}

/// A key that needs manual attention in the final output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlaggedKey {
    #[serde(rename = "Loc_key")]
    pub key: String,
    pub stage: String,
    pub reason: String,
}

/// Final persisted document. `coordinates`, `Loc_key` and `overlap` are
/// parallel arrays: index `i` in each refers to the same point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedDataset {
    pub coordinates: Vec<[f64; 2]>,
    #[serde(rename = "type")]
    pub geometry_type: String,
    #[serde(rename = "Loc_key")]
    pub keys: Vec<String>,
    pub overlap: Vec<Option<i64>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flagged: Vec<FlaggedKey>,
}

impl EnrichedDataset {
    /// Merge overlap results back onto the points by position.
    ///
    /// `results` may be shorter than `points` when counting stopped early;
    /// the missing tail is emitted as `null` and flagged. `flagged` carries
    /// entries from earlier stages (e.g. enrichment failures).
    pub fn merge(
        points: &PointCollection,
        results: &[OverlapResult],
        mut flagged: Vec<FlaggedKey>,
    ) -> Self {
        let mut overlap = Vec::with_capacity(points.len());

        for (index, point) in points.iter().enumerate() {
            match results.get(index) {
                Some(result) if result.key == point.key => {
                    overlap.push(result.overlap_count());
                    match &result.outcome {
                        OverlapOutcome::Counted(_) => {}
                        OverlapOutcome::Anomalous { reason, .. } => flagged.push(FlaggedKey {
                            key: point.key.clone(),
                            stage: "count-overlaps".to_string(),
                            reason: format!("anomaly: {}", reason),
                        }),
                        OverlapOutcome::Failed { reason } => flagged.push(FlaggedKey {
                            key: point.key.clone(),
                            stage: "count-overlaps".to_string(),
                            reason: reason.clone(),
                        }),
                    }
                }
                Some(result) => {
                    overlap.push(None);
                    flagged.push(FlaggedKey {
                        key: point.key.clone(),
                        stage: "merge".to_string(),
                        reason: format!("result at this position belongs to '{}'", result.key),
                    });
                }
                None => {
                    overlap.push(None);
                    flagged.push(FlaggedKey {
                        key: point.key.clone(),
                        stage: "count-overlaps".to_string(),
                        reason: "overlap not computed".to_string(),
                    });
                }
            }
        }

        Self {
            coordinates: points.coordinates(),
            geometry_type: MULTI_POINT.to_string(),
            keys: points.keys().into_iter().map(String::from).collect(),
            overlap,
            flagged,
        }
    }

    pub fn is_aligned(&self) -> bool {
        self.coordinates.len() == self.keys.len() && self.keys.len() == self.overlap.len()
    }
}
