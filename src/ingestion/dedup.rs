//! Key-level and coordinate-level duplicate detection.

use hashbrown::HashSet;
use tracing::debug;

use crate::error::RejectReason;

/// Membership sets for one ingestion run.
///
/// Checks must run in input order: the first occurrence of a key or a
/// coordinate pair wins, every later one is rejected.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen_keys: HashSet<String>,
    seen_coords: HashSet<(u64, u64)>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key check runs before the coordinate check. Both sets are updated only
    /// when both checks pass.
    pub fn check(&mut self, key: &str, lon: f64, lat: f64) -> Result<(), RejectReason> {
        if self.seen_keys.contains(key) {
            return Err(RejectReason::DuplicateKey);
        }

        let coord = coordinate_bits(lon, lat);
        if self.seen_coords.contains(&coord) {
            debug!("Coordinate ({}, {}) already taken, rejecting {}", lon, lat, key);
            return Err(RejectReason::DuplicateCoordinate);
        }

        self.seen_keys.insert(key.to_string());
        self.seen_coords.insert(coord);
        Ok(())
    }

    pub fn accepted(&self) -> usize {
        self.seen_keys.len()
    }
}

/// Exact-equality hash key for a coordinate pair. `-0.0` and `0.0` compare
/// equal as floats, so they must map to the same bits.
fn coordinate_bits(lon: f64, lat: f64) -> (u64, u64) {
    let normalize = |v: f64| if v == 0.0 { 0.0f64 } else { v };
    (normalize(lon).to_bits(), normalize(lat).to_bits())
}
