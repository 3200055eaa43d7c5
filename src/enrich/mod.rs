//! Per-point enrichment against external providers.
//!
//! Both stages call a provider once per point, keep results in point order,
//! and share the same rate limiting and failure policy.

mod isochrone;
mod overlap;

pub use isochrone::{EnrichmentOutcome, IsochroneEnricher};
pub use overlap::{CountAborted, OverlapCounter};

use std::num::NonZeroU32;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;

/// What to do when a single point cannot be enriched or counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop at the first failing point
    #[default]
    Abort,
    /// Record the failure against the key and move on
    Skip,
}

/// Token bucket sized to a provider's per-minute ceiling, allowing a burst
/// of `burst` calls.
pub(crate) fn per_minute_limiter(requests_per_minute: u32, burst: usize) -> DefaultDirectRateLimiter {
    let rate = NonZeroU32::new(requests_per_minute.max(1)).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new((burst.max(1)).min(u32::MAX as usize) as u32).unwrap_or(NonZeroU32::MIN);
    RateLimiter::direct(Quota::per_minute(rate).allow_burst(burst))
}
