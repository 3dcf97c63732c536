//! Bounded readiness polling
//!
//! A probe is invoked until it reports ready or the attempt budget runs out.
//! The interval between attempts is fixed: local cluster bring-up converges
//! in roughly predictable time, so there is no backoff or jitter. A probe
//! error counts as "not ready yet"; it is only surfaced, as the last
//! observed error, when the budget is exhausted.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Interval and attempt budget for one kind of readiness wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Seconds slept between attempts
    pub interval_secs: u64,
    /// Maximum number of probe invocations
    pub max_attempts: u32,
}

impl PollConfig {
    /// CRDs becoming established: 10 attempts, 5s apart
    pub const CRD: Self = Self::new(5, 10);

    /// Network endpoints answering: 20 attempts, 10s apart
    pub const ENDPOINT: Self = Self::new(10, 20);

    /// Create a poll configuration
    pub const fn new(interval_secs: u64, max_attempts: u32) -> Self {
        Self {
            interval_secs,
            max_attempts,
        }
    }

    /// The sleep between attempts
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Reject a budget that would never invoke the probe
    pub fn validate(&self, what: &str) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::validation(format!(
                "{what}: max_attempts must be at least 1"
            )));
        }
        Ok(())
    }
}

/// How a poll ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The probe reported ready on attempt `attempts`
    Ready {
        /// Attempts used, including the successful one
        attempts: u32,
    },
    /// The budget was exhausted
    TimedOut {
        /// Attempts made
        attempts: u32,
        /// Last error the probe returned, if it ever returned one
        last_error: Option<String>,
    },
}

impl PollOutcome {
    /// Whether the probe reported ready
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    /// Map a timeout to [`Error::ReadinessTimeout`], returning attempts used on success
    pub fn into_result(self, what: &str) -> Result<u32> {
        match self {
            Self::Ready { attempts } => Ok(attempts),
            Self::TimedOut {
                attempts,
                last_error,
            } => Err(Error::ReadinessTimeout {
                what: what.to_string(),
                attempts,
                last_error,
            }),
        }
    }
}

/// Invoke `probe` until it returns `Ok(true)` or `config.max_attempts` is spent.
///
/// Sleeps `config.interval()` between attempts and never after the last one,
/// so a probe that never succeeds costs exactly `max_attempts` invocations and
/// `max_attempts - 1` intervals.
///
/// # Arguments
/// * `config` - Interval and attempt budget
/// * `what` - Human-readable description for logs
/// * `probe` - Async check returning `Ok(true)` when ready
pub async fn poll_until_ready<F, Fut>(config: &PollConfig, what: &str, mut probe: F) -> PollOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        match probe().await {
            Ok(true) => {
                debug!(what, attempt, "Ready");
                return PollOutcome::Ready { attempts: attempt };
            }
            Ok(false) => debug!(what, attempt, max_attempts, "Not ready yet"),
            Err(e) => {
                debug!(
                    what,
                    attempt,
                    max_attempts,
                    error = %e,
                    "Probe failed, treating as not ready"
                );
                last_error = Some(e.to_string());
            }
        }

        if attempt < max_attempts {
            tokio::time::sleep(config.interval()).await;
        }
    }

    PollOutcome::TimedOut {
        attempts: max_attempts,
        last_error,
    }
}

/// [`poll_until_ready`] mapped to a `Result`
pub async fn wait_until_ready<F, Fut>(config: &PollConfig, what: &str, probe: F) -> Result<u32>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    poll_until_ready(config, what, probe).await.into_result(what)
}
