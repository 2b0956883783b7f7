//! In-flight resize jobs.
//!
//! A [`ResizeJob`] is the handle every requester for the same key shares
//! while a resize is pending. It is a one-shot promise: the task doing the
//! work calls [`ResizeJob::complete`] once, and any number of callers can
//! either poll [`ResizeJob::outcome`] or await [`ResizeJob::wait`].
//!
//! Completion is published through a `watch` channel, so a waiter that
//! subscribes after the job finished still sees the result.

use std::time::Instant;

use tokio::sync::watch;

use crate::error::DerivativeError;

use super::service::Derivative;

/// Result recorded by a finished job.
pub type JobResult = Result<Derivative, DerivativeError>;

/// A pending or finished resize for one key.
#[derive(Debug)]
pub struct ResizeJob {
    tx: watch::Sender<Option<JobResult>>,
    started_at: Instant,
}

impl ResizeJob {
    /// Create a pending job.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            tx,
            started_at: Instant::now(),
        }
    }

    /// The recorded result, or `None` while the job is pending.
    pub fn outcome(&self) -> Option<JobResult> {
        self.tx.borrow().clone()
    }

    /// Whether the job has finished.
    pub fn is_complete(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// When the job was registered.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Record the result and wake every waiter. Only the first call has any
    /// effect.
    pub fn complete(&self, result: JobResult) {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(result);
            true
        });
    }

    /// Wait for the job to finish and return its result.
    pub async fn wait(&self) -> JobResult {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or(Err(DerivativeError::Busy))
    }
}

impl Default for ResizeJob {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
