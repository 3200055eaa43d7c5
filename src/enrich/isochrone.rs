//! Builds the polygon collection: two isochrones per accepted point.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use governor::DefaultDirectRateLimiter;
use indicatif::ProgressBar;
use tracing::{debug, error, info, warn};

use super::{per_minute_limiter, FailurePolicy};
use crate::error::EnrichmentError;
use crate::models::{Horizon, IsochronePair, PointCollection, PolygonCollection, ValidatedPoint};
use crate::providers::IsochroneProvider;
use crate::retry::RetryPolicy;

/// Result of enriching a whole collection.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentOutcome {
    pub polygons: PolygonCollection,
    /// Points skipped under [`FailurePolicy::Skip`], in point order
    pub failures: Vec<EnrichmentError>,
}

impl EnrichmentOutcome {
    pub fn failed_keys(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(EnrichmentError::key)
    }
}

pub struct IsochroneEnricher {
    provider: Arc<dyn IsochroneProvider>,
    limiter: DefaultDirectRateLimiter,
    retry: RetryPolicy,
    call_timeout: Duration,
    concurrency: usize,
    policy: FailurePolicy,
    progress: ProgressBar,
}

impl IsochroneEnricher {
    /// Defaults: 300 requests/minute, 4 calls in flight, 30 s per call.
    pub fn new(provider: Arc<dyn IsochroneProvider>) -> Self {
        Self {
            provider,
            limiter: per_minute_limiter(300, 4),
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(30),
            concurrency: 4,
            policy: FailurePolicy::Abort,
            progress: ProgressBar::hidden(),
        }
    }

    /// Sets both the rate ceiling and the number of calls in flight.
    pub fn with_rate_limit(mut self, requests_per_minute: u32, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self.limiter = per_minute_limiter(requests_per_minute, self.concurrency);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Fetch and check both isochrones for one point.
    pub async fn enrich_point(&self, point: &ValidatedPoint) -> Result<IsochronePair, EnrichmentError> {
        let label = format!("Isochrone request for {}", point.key);
        let (result, attempts) = self
            .retry
            .run(&label, self.call_timeout, move || async move {
                self.limiter.until_ready().await;
                self.provider.fetch(point.lon, point.lat).await
            })
            .await;

        let mut pair =
            result.map_err(|e| EnrichmentError::from_provider(&point.key, e, attempts))?;

        let malformed = |reason: String| EnrichmentError::MalformedResponse {
            key: point.key.clone(),
            reason,
        };
        if pair.short.horizon != Horizon::Short || pair.long.horizon != Horizon::Long {
            return Err(malformed(format!(
                "horizons out of order: got {} then {}",
                pair.short.horizon, pair.long.horizon
            )));
        }
        for feature in [&pair.short, &pair.long] {
            feature
                .to_polygons()
                .map_err(|e| malformed(format!("{} isochrone: {}", feature.horizon, e)))?;
        }

        pair.short.source_key = point.key.clone();
        pair.long.source_key = point.key.clone();
        debug!("Isochrones ready for {}", point.key);
        Ok(pair)
    }

    /// Enrich every point, keeping input order regardless of how many calls
    /// are in flight.
    pub async fn enrich(&self, points: &PointCollection) -> Result<EnrichmentOutcome, EnrichmentError> {
        info!(
            "Fetching isochrones for {} points ({} in flight)",
            points.len(),
            self.concurrency
        );
        self.progress.set_length(points.len() as u64);

        let mut results = stream::iter(points.iter())
            .map(|point| self.enrich_point(point))
            .buffered(self.concurrency);

        let mut outcome = EnrichmentOutcome::default();
        while let Some(result) = results.next().await {
            self.progress.inc(1);
            match result {
                Ok(pair) => outcome.polygons.push_pair(pair),
                Err(e) => match self.policy {
                    FailurePolicy::Abort => {
                        error!("Aborting enrichment: {}", e);
                        self.progress.abandon();
                        return Err(e);
                    }
                    FailurePolicy::Skip => {
                        warn!("Skipping point: {}", e);
                        outcome.failures.push(e);
                    }
                },
            }
        }

        self.progress.finish_and_clear();
        info!(
            "Built {} isochrone features ({} points skipped)",
            outcome.polygons.len(),
            outcome.failures.len()
        );
        Ok(outcome)
    }
}
