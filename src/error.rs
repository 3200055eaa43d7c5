//! Error taxonomy for ingestion, enrichment, overlap counting and uploads.

use std::time::Duration;

use thiserror::Error;

use crate::orchestrator::Stage;

/// Why a raw record was quarantined instead of accepted.
///
/// `NotNumeric` and `OutOfRange` come from validation, `DuplicateKey` and
/// `DuplicateCoordinate` from deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("latitude or longitude is not a finite number")]
    NotNumeric,
    #[error("coordinate lies outside the configured region")]
    OutOfRange,
    #[error("location key was already accepted in this run")]
    DuplicateKey,
    #[error("coordinate pair was already accepted in this run")]
    DuplicateCoordinate,
}

impl RejectReason {
    pub fn is_validation(&self) -> bool {
        matches!(self, RejectReason::NotNumeric | RejectReason::OutOfRange)
    }

    pub fn is_duplicate(&self) -> bool {
        !self.is_validation()
    }
}

/// Failure reported by an external provider call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider failure: {0}")]
    Failure(String),
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Throttling, timeouts and transient server errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Timeout(_)
                | ProviderError::Unavailable(_)
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Prefix the message with the step that failed, keeping the variant so
    /// retry decisions are unchanged.
    pub fn in_step(self, step: &str) -> Self {
        match self {
            ProviderError::Unavailable(m) => ProviderError::Unavailable(format!("{}: {}", step, m)),
            ProviderError::Failure(m) => ProviderError::Failure(format!("{}: {}", step, m)),
            ProviderError::Malformed(m) => ProviderError::Malformed(format!("{}: {}", step, m)),
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnrichmentError {
    #[error("isochrone provider failed for {key}: {reason}")]
    ProviderFailure { key: String, reason: String },
    #[error("malformed isochrone response for {key}: {reason}")]
    MalformedResponse { key: String, reason: String },
    #[error("isochrone provider still rate limiting {key} after {attempts} attempts")]
    RateLimited { key: String, attempts: u32 },
}

impl EnrichmentError {
    /// Map the last provider error of a (possibly retried) call onto the key.
    pub fn from_provider(key: &str, err: ProviderError, attempts: u32) -> Self {
        let key = key.to_string();
        match err {
            ProviderError::RateLimited { .. } => EnrichmentError::RateLimited { key, attempts },
            ProviderError::Malformed(reason) => EnrichmentError::MalformedResponse { key, reason },
            other => EnrichmentError::ProviderFailure {
                key,
                reason: other.to_string(),
            },
        }
    }

    pub fn key(&self) -> &str {
        match self {
            EnrichmentError::ProviderFailure { key, .. }
            | EnrichmentError::MalformedResponse { key, .. }
            | EnrichmentError::RateLimited { key, .. } => key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OverlapQueryError {
    #[error("spatial query failed for {key}: {reason}")]
    ProviderFailure { key: String, reason: String },
    #[error("spatial query still rate limited for {key} after {attempts} attempts")]
    RateLimited { key: String, attempts: u32 },
}

impl OverlapQueryError {
    pub fn from_provider(key: &str, err: ProviderError, attempts: u32) -> Self {
        let key = key.to_string();
        match err {
            ProviderError::RateLimited { .. } => OverlapQueryError::RateLimited { key, attempts },
            other => OverlapQueryError::ProviderFailure {
                key,
                reason: other.to_string(),
            },
        }
    }

    pub fn key(&self) -> &str {
        match self {
            OverlapQueryError::ProviderFailure { key, .. }
            | OverlapQueryError::RateLimited { key, .. } => key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("upload of '{label}' rejected: {reason}")]
    Rejected { label: String, reason: String },
    #[error("upload of '{label}' still rate limited after {attempts} attempts")]
    RateLimited { label: String, attempts: u32 },
    #[error("upload of '{label}' not complete after {attempts} status polls")]
    TimedOutWaitingForCompletion { label: String, attempts: u32 },
    #[error("upload of '{label}' failed while processing: {reason}")]
    Failed { label: String, reason: String },
}

impl UploadError {
    /// Map the last provider error of a retried upload call onto the label.
    pub fn from_provider(label: &str, err: ProviderError, attempts: u32) -> Self {
        let label = label.to_string();
        match err {
            ProviderError::RateLimited { .. } => UploadError::RateLimited { label, attempts },
            other => UploadError::Rejected {
                label,
                reason: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("configuration error: {0}")]
pub struct ConfigurationError(pub String);

/// Fatal error for a whole pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("pipeline failed during {stage}: {source:#}")]
    Stage {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    pub fn stage(stage: Stage, source: impl Into<anyhow::Error>) -> Self {
        PipelineError::Stage {
            stage,
            source: source.into(),
        }
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Stage { stage, .. } => Some(*stage),
            PipelineError::Configuration(_) => None,
        }
    }
}
