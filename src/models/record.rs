//! Raw input rows and their quarantined form.

use crate::error::RejectReason;

/// One input row, exactly as read from the record source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub key: String,
    pub latitude: String,
    pub longitude: String,
}

impl RawRecord {
    pub fn new(
        key: impl Into<String>,
        latitude: impl Into<String>,
        longitude: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            latitude: latitude.into(),
            longitude: longitude.into(),
        }
    }
}

/// A rejected row. Keeps the original strings so the quarantine file can be
/// reviewed and fixed by hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantineRecord {
    pub key: String,
    pub latitude_raw: String,
    pub longitude_raw: String,
    pub reason: RejectReason,
}

impl QuarantineRecord {
    pub fn from_raw(raw: RawRecord, reason: RejectReason) -> Self {
        Self {
            key: raw.key,
            latitude_raw: raw.latitude,
            longitude_raw: raw.longitude,
            reason,
        }
    }
}
