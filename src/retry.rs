//! Fetch retry policies.
//!
//! The MXA firmware occasionally drops the first trace fetch after a single
//! sweep, so [`RetryPolicy::SwallowThenRefetch`] issues the fetch once,
//! discards whatever came back, and issues it again, trusting only the second
//! reply. The policy lives behind this enum so an engine can switch to
//! bounded [`RetryPolicy::Backoff`] without any other change.

use crate::error::{InstrumentError, Result};
use std::future::Future;
use std::time::Duration;

/// How an acquisition engine re-issues its trace fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Issue the fetch once, discard its outcome (value or error), then
    /// issue it a second time and use that result. Errors from the second
    /// attempt propagate.
    SwallowThenRefetch,

    /// Up to `attempts` tries with linear backoff (`base_delay × attempt`)
    /// between them; first success wins.
    Backoff {
        /// Maximum number of attempts (at least one is always made).
        attempts: u32,
        /// Backoff unit between attempts.
        base_delay: Duration,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::SwallowThenRefetch
    }
}

impl RetryPolicy {
    /// Run `op` under this policy.
    pub(crate) async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match *self {
            RetryPolicy::SwallowThenRefetch => {
                if let Err(e) = op().await {
                    tracing::debug!(error = %e, "first fetch attempt failed, refetching");
                }
                op().await
            }
            RetryPolicy::Backoff {
                attempts,
                base_delay,
            } => {
                let mut last_error = None;
                for attempt in 0..attempts.max(1) {
                    if attempt > 0 {
                        let backoff = base_delay * attempt;
                        tracing::debug!(attempt, backoff_ms = backoff.as_millis() as u64, "retrying fetch after backoff");
                        tokio::time::sleep(backoff).await;
                    }
                    match op().await {
                        Ok(value) => return Ok(value),
                        Err(e) => {
                            tracing::debug!(attempt, error = %e, "fetch attempt failed");
                            last_error = Some(e);
                        }
                    }
                }
                Err(last_error.unwrap_or_else(|| {
                    InstrumentError::invalid("retry policy made no attempts")
                }))
            }
        }
    }
}
