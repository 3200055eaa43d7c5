//! Overlap counting: how many other points' isochrones cover each point.
//!
//! The count is `matches - 2` for a zero-radius polygon query at the point.
//! The 2 are the point's own short and long isochrones, so the result is only
//! meaningful once those polygons are in the queried layer.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use governor::DefaultDirectRateLimiter;
use hashbrown::HashSet;
use indicatif::ProgressBar;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::{per_minute_limiter, FailurePolicy};
use crate::error::OverlapQueryError;
use crate::models::dataset::SELF_POLYGONS;
use crate::models::{OverlapOutcome, OverlapResult, PointCollection, ValidatedPoint};
use crate::providers::{SpatialQuery, SpatialQueryProvider};
use crate::retry::RetryPolicy;

/// Counting stopped at the first failure under [`FailurePolicy::Abort`].
/// `partial` holds the results computed before it, in point order.
#[derive(Debug, Error)]
#[error("overlap counting aborted after {} points: {error}", partial.len())]
pub struct CountAborted {
    pub partial: Vec<OverlapResult>,
    #[source]
    pub error: OverlapQueryError,
}

pub struct OverlapCounter {
    provider: Arc<dyn SpatialQueryProvider>,
    layer: String,
    limit: usize,
    limiter: DefaultDirectRateLimiter,
    retry: RetryPolicy,
    call_timeout: Duration,
    concurrency: usize,
    policy: FailurePolicy,
    progress: ProgressBar,
    reference: Option<Arc<dyn SpatialQueryProvider>>,
    excluded: HashSet<String>,
}

impl OverlapCounter {
    /// `limit` caps matches per query; it must exceed the largest plausible
    /// overlap plus the point's own polygons.
    pub fn new(provider: Arc<dyn SpatialQueryProvider>, layer: impl Into<String>, limit: usize) -> Self {
        Self {
            provider,
            layer: layer.into(),
            limit,
            limiter: per_minute_limiter(600, 4),
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(30),
            concurrency: 4,
            policy: FailurePolicy::Abort,
            progress: ProgressBar::hidden(),
            reference: None,
            excluded: HashSet::new(),
        }
    }

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

    /// Cross-check every remote count against a provider that only knows
    /// this run's polygons. A mismatch means the remote layer holds polygons
    /// from elsewhere (or is missing some of ours), so the fixed correction
    /// of 2 cannot be trusted for that point.
    pub fn with_reference(mut self, reference: Arc<dyn SpatialQueryProvider>) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Keys whose isochrones never reached the layer. They are reported as
    /// failed without querying.
    pub fn exclude_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn layer(&self) -> &str {
        &self.layer
    }

    /// The configured limit, lowered to what the provider will honour.
    pub fn effective_limit(&self) -> usize {
        match self.provider.max_limit() {
            Some(cap) => self.limit.min(cap),
            None => self.limit,
        }
    }

    /// Query one point and apply the self-overlap correction.
    pub async fn count_point(&self, point: &ValidatedPoint) -> Result<OverlapResult, OverlapQueryError> {
        let limit = self.effective_limit();
        let query = SpatialQuery::covering(&self.layer, point.lon, point.lat, limit);
        let label = format!("Spatial query for {}", point.key);

        let query_ref = &query;
        let (result, attempts) = self
            .retry
            .run(&label, self.call_timeout, move || async move {
                self.limiter.until_ready().await;
                self.provider.query(query_ref).await
            })
            .await;
        let matches =
            result.map_err(|e| OverlapQueryError::from_provider(&point.key, e, attempts))?;

        debug!("{} polygons cover {}", matches.len(), point.key);

        let mut result = OverlapResult::from_matches(point.key.clone(), matches.len());
        if matches.len() >= limit {
            result.outcome = OverlapOutcome::Anomalous {
                raw_matches: matches.len(),
                reason: format!("result reached the query limit of {}; count may be capped", limit),
            };
        }

        let counted = matches!(result.outcome, OverlapOutcome::Counted(_));
        if let Some(reference) = self.reference.as_ref().filter(|_| counted) {
            match reference.query(&query).await {
                Ok(local)
                    if local
                        .iter()
                        .filter(|r| r.source_key() == Some(point.key.as_str()))
                        .count()
                        < SELF_POLYGONS =>
                {
                    result.outcome = OverlapOutcome::Anomalous {
                        raw_matches: matches.len(),
                        reason: "the point's own isochrones do not cover it".to_string(),
                    };
                }
                Ok(local) if local.len() != matches.len() => {
                    result.outcome = OverlapOutcome::Anomalous {
                        raw_matches: matches.len(),
                        reason: format!(
                            "layer reports {} covering polygons but this run produced {}",
                            matches.len(),
                            local.len()
                        ),
                    };
                }
                Ok(_) => {}
                Err(e) => warn!("Reference check failed for {}: {}", point.key, e),
            }
        }

        if result.is_anomalous() {
            warn!("Overlap anomaly for {}: {:?}", point.key, result.outcome);
        }
        Ok(result)
    }

    /// Count overlaps for every point, in point order.
    pub async fn count_overlaps(&self, points: &PointCollection) -> Result<Vec<OverlapResult>, CountAborted> {
        info!(
            "Counting overlaps for {} points against {}",
            points.len(),
            self.layer
        );
        self.progress.set_length(points.len() as u64);

        let mut results = stream::iter(points.iter())
            .map(|point| async move {
                if self.excluded.contains(point.key.as_str()) {
                    Ok(OverlapResult::failed(
                        point.key.clone(),
                        "isochrones missing from layer; self-overlap correction does not apply",
                    ))
                } else {
                    self.count_point(point).await
                }
            })
            .buffered(self.concurrency);

        let mut counted = Vec::with_capacity(points.len());
        while let Some(result) = results.next().await {
            self.progress.inc(1);
            match result {
                Ok(result) => counted.push(result),
                Err(e) => match self.policy {
                    FailurePolicy::Abort => {
                        error!("Aborting overlap count: {}", e);
                        self.progress.abandon();
                        return Err(CountAborted {
                            partial: counted,
                            error: e,
                        });
                    }
                    FailurePolicy::Skip => {
                        warn!("Marking point failed: {}", e);
                        counted.push(OverlapResult::failed(e.key(), e.to_string()));
                    }
                },
            }
        }

        self.progress.finish_and_clear();
        let flagged = counted
            .iter()
            .filter(|r| r.is_anomalous() || r.is_failed())
            .count();
        info!("Counted overlaps for {} points ({} flagged)", counted.len(), flagged);
        Ok(counted)
    }
}
