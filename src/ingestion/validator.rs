//! Per-row structural and geographic checks.

use serde::Deserialize;

use crate::error::{ConfigurationError, RejectReason};
use crate::models::{RawRecord, ValidatedPoint};

/// Region of interest. All comparisons are strict: a coordinate sitting
/// exactly on a bound is outside.
///
/// The defaults cover Milwaukee and the Greater Chicago metro area.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RegionBounds {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl Default for RegionBounds {
    fn default() -> Self {
        Self {
            lat_min: 41.0,
            lat_max: 44.0,
            lon_min: -89.0,
            lon_max: -87.0,
        }
    }
}

impl RegionBounds {
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        self.lat_min < lat && lat < self.lat_max && self.lon_min < lon && lon < self.lon_max
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let all_finite = [self.lat_min, self.lat_max, self.lon_min, self.lon_max]
            .iter()
            .all(|v| v.is_finite());
        if !all_finite {
            return Err(ConfigurationError(
                "region bounds must be finite numbers".to_string(),
            ));
        }
        if self.lat_min >= self.lat_max || self.lon_min >= self.lon_max {
            return Err(ConfigurationError(format!(
                "region bounds are empty: lat ({}, {}), lon ({}, {})",
                self.lat_min, self.lat_max, self.lon_min, self.lon_max
            )));
        }
        Ok(())
    }
}

/// Stateless validator; safe to share across tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordValidator {
    bounds: RegionBounds,
}

impl RecordValidator {
    pub fn new(bounds: RegionBounds) -> Self {
        Self { bounds }
    }

    pub fn bounds(&self) -> &RegionBounds {
        &self.bounds
    }

    pub fn validate(&self, raw: &RawRecord) -> Result<ValidatedPoint, RejectReason> {
        let lat = parse_coordinate(&raw.latitude).ok_or(RejectReason::NotNumeric)?;
        let lon = parse_coordinate(&raw.longitude).ok_or(RejectReason::NotNumeric)?;

        if !self.bounds.contains(lon, lat) {
            return Err(RejectReason::OutOfRange);
        }

        Ok(ValidatedPoint::new(raw.key.clone(), lon, lat))
    }
}

fn parse_coordinate(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> RecordValidator {
        RecordValidator::default()
    }

    #[test]
    fn test_accepts_point_in_region() {
        let raw = RawRecord::new("34", "41.8869909", "-87.6770135");
        let point = validator().validate(&raw).unwrap();
        assert_eq!(point.key, "34");
        assert_eq!(point.lat, 41.8869909);
        assert_eq!(point.lon, -87.6770135);
    }

    #[test]
    fn test_not_numeric() {
        let raw = RawRecord::new("44", "N/A", "N/A");
        assert_eq!(validator().validate(&raw), Err(RejectReason::NotNumeric));

        let raw = RawRecord::new("45", "41.9", "");
        assert_eq!(validator().validate(&raw), Err(RejectReason::NotNumeric));
    }

    #[test]
    fn test_non_finite_is_not_numeric() {
        let raw = RawRecord::new("46", "NaN", "-87.7");
        assert_eq!(validator().validate(&raw), Err(RejectReason::NotNumeric));

        let raw = RawRecord::new("47", "41.9", "-inf");
        assert_eq!(validator().validate(&raw), Err(RejectReason::NotNumeric));
    }

    #[test]
    fn test_out_of_range() {
        let raw = RawRecord::new("136", "9999999", "9999999");
        assert_eq!(validator().validate(&raw), Err(RejectReason::OutOfRange));
    }

    #[test]
    fn test_bounds_are_strict() {
        let v = validator();
        assert_eq!(
            v.validate(&RawRecord::new("a", "41", "-88")),
            Err(RejectReason::OutOfRange)
        );
        assert_eq!(
            v.validate(&RawRecord::new("b", "42", "-87")),
            Err(RejectReason::OutOfRange)
        );
        assert_eq!(
            v.validate(&RawRecord::new("c", "44", "-88")),
            Err(RejectReason::OutOfRange)
        );
        assert_eq!(
            v.validate(&RawRecord::new("d", "42", "-89")),
            Err(RejectReason::OutOfRange)
        );
        assert!(v.validate(&RawRecord::new("e", "41.0001", "-87.5")).is_ok());
    }

    #[test]
    fn test_surrounding_whitespace_is_tolerated() {
        let raw = RawRecord::new("48", " 41.69 ", "-87.84 ");
        assert!(validator().validate(&raw).is_ok());
    }

    #[test]
    fn test_empty_bounds_rejected() {
        let bounds = RegionBounds {
            lat_min: 44.0,
            lat_max: 41.0,
            ..RegionBounds::default()
        };
        assert!(bounds.validate().is_err());
        assert!(RegionBounds::default().validate().is_ok());
    }
}
