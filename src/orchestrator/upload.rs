//! Bounded wait for a dataset upload to become queryable.

use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::error::{ProviderError, UploadError};
use crate::providers::{DatasetStore, UploadTicket};

/// Poll `store` until `ticket` completes, at most `max_polls` times.
///
/// Each status call is bounded by `call_timeout`. Timeouts and transient
/// status errors count as an unfinished poll. A store-reported failure or a
/// non-retryable status error ends the wait immediately.
pub async fn await_completion(
    store: &dyn DatasetStore,
    ticket: &UploadTicket,
    interval: Duration,
    call_timeout: Duration,
    max_polls: u32,
) -> Result<(), UploadError> {
    for poll in 1..=max_polls {
        let mut wait = interval;
        let status = match timeout(call_timeout, store.status(ticket)).await {
            Ok(status) => status,
            Err(_) => Err(ProviderError::Timeout(call_timeout)),
        };
        match status {
            Ok(status) if status.complete => {
                info!("Upload '{}' complete after {} polls", ticket.label, poll);
                return Ok(());
            }
            Ok(status) => {
                if let Some(reason) = status.error {
                    return Err(UploadError::Failed {
                        label: ticket.label.clone(),
                        reason,
                    });
                }
                debug!(
                    "Upload '{}' pending (poll {}/{}, progress {:?})",
                    ticket.label, poll, max_polls, status.progress
                );
            }
            Err(e) if e.is_retryable() => {
                warn!("Status poll for '{}' failed: {}", ticket.label, e);
                if let Some(retry_after) = e.retry_after() {
                    wait = wait.max(retry_after);
                }
            }
            Err(e) => {
                return Err(UploadError::Failed {
                    label: ticket.label.clone(),
                    reason: e.to_string(),
                });
            }
        }

        if poll < max_polls {
            sleep(wait).await;
        }
    }

    Err(UploadError::TimedOutWaitingForCompletion {
        label: ticket.label.clone(),
        attempts: max_polls,
    })
}
