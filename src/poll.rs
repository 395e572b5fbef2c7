//! Bounded polling shared by status reconciliation and device readiness.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

/// Interval and attempt budget for a bounded poll.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Delay between consecutive probes.
    pub interval: Duration,
    /// Total number of probes, including the first.
    pub max_attempts: u32,
}

impl PollPolicy {
    /// Creates a policy probing `max_attempts` times, `interval` apart.
    #[must_use]
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

/// Result of a bounded poll that did not fail outright.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PollOutcome<T> {
    /// The probe produced a value.
    Ready(T),
    /// Every attempt ran without the probe producing a value.
    Exhausted {
        /// Number of probes performed.
        attempts: u32,
    },
}

/// Runs `probe` until it yields `Some`, an error, or the budget runs out.
///
/// The first probe runs immediately; later probes are separated by the policy
/// interval. No sleep follows the final probe.
///
/// # Errors
///
/// Returns the first error produced by `probe`.
pub async fn poll_until<T, E, F, Fut>(
    policy: PollPolicy,
    mut probe: F,
) -> Result<PollOutcome<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    for attempt in 1..=policy.max_attempts {
        if let Some(value) = probe().await? {
            return Ok(PollOutcome::Ready(value));
        }
        if attempt < policy.max_attempts {
            sleep(policy.interval).await;
        }
    }
    Ok(PollOutcome::Exhausted {
        attempts: policy.max_attempts,
    })
}
