//! Sweep-completion polling.
//!
//! The network analyzer arms a single sweep with an operation-complete
//! marker (`*OPC`) and then watches the event status register until the
//! completion bit is reported. [`CompletionPoll`] drives that wait as an
//! explicit state machine; the status query is issued first, so a sweep that
//! already finished completes with zero sleeps.
//!
//! By default the poll runs until the instrument reports completion or the
//! transport itself fails, so a missed trigger blocks the caller
//! indefinitely. Set [`PollConfig::max_poll`] to bound
//! the wait and surface a [`Timeout`](crate::error::InstrumentError::Timeout)
//! instead.

use crate::error::{InstrumentError, Result};
use crate::transport::Transport;
use serde::Deserialize;
use std::time::Duration;

/// Register value the instrument reports when the sweep has completed.
pub const COMPLETION_CODE: &str = "1";

const STATUS_QUERY: &str = "*ESR?";

/// Tuning for the completion poll.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Delay between status queries.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Upper bound on the whole poll. `None` (the default) polls until the
    /// instrument reports completion or the transport fails.
    #[serde(with = "humantime_serde")]
    pub max_poll: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            max_poll: None,
        }
    }
}

/// Where the poll currently stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollState {
    /// No sweep armed.
    Idle,
    /// Sweep triggered, poll not yet running.
    Triggered,
    /// Actively querying the status register.
    Polling,
    /// Completion code observed.
    Complete,
    /// Transport failure or poll deadline exceeded.
    Failed,
}

/// One sweep's completion wait.
///
/// Construct per acquisition; [`arm`](Self::arm) after the trigger has been
/// written, then [`wait`](Self::wait) until the register reports completion.
#[derive(Debug)]
pub struct CompletionPoll {
    config: PollConfig,
    state: PollState,
}

impl CompletionPoll {
    /// New idle poll with the given tuning.
    pub fn new(config: PollConfig) -> Self {
        Self {
            config,
            state: PollState::Idle,
        }
    }

    /// Current state.
    pub fn state(&self) -> PollState {
        self.state
    }

    /// Record that the sweep trigger has been issued.
    pub fn arm(&mut self) {
        self.state = PollState::Triggered;
    }

    /// Poll the event status register until the completion code appears.
    pub async fn wait(&mut self, transport: &dyn Transport) -> Result<()> {
        let started = tokio::time::Instant::now();
        loop {
            self.state = PollState::Polling;
            match transport.query(STATUS_QUERY).await {
                Ok(status) if status.trim() == COMPLETION_CODE => {
                    self.state = PollState::Complete;
                    tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "sweep complete");
                    return Ok(());
                }
                Ok(status) => {
                    tracing::trace!(%status, "sweep still running");
                }
                Err(e) => {
                    self.state = PollState::Failed;
                    return Err(e);
                }
            }

            if let Some(max_poll) = self.config.max_poll {
                if started.elapsed() >= max_poll {
                    self.state = PollState::Failed;
                    return Err(InstrumentError::Timeout {
                        waited: started.elapsed(),
                    });
                }
            }

            tokio::time::sleep(self.config.interval).await;
        }
    }
}
