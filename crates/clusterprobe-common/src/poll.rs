//! Bounded convergence polling
//!
//! One loop for every "wait until X, or give up" in the harness. A check is
//! evaluated on a fixed cadence, starting one interval after the call, until it
//! reports [`Readiness::Ready`], reports [`Readiness::Failed`], or a stopping
//! condition from the [`PollSpec`] is reached.
//!
//! # Example
//!
//! ```ignore
//! use clusterprobe_common::poll::{wait_for, PollSpec, Readiness};
//!
//! let spec = PollSpec::with_timeout(Duration::from_secs(5), Duration::from_secs(120))?;
//! wait_for("pod core/web", &spec, &cancel, || async {
//!     let pod = pods.get("web").await.map_err(|e| Error::from_kube_query("pod core/web", e))?;
//!     Ok(classify_pod(&pod, FailurePolicy::Reject))
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn, Instrument};

use crate::Error;

/// Longest accepted interval between checks
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Stopping policy for one wait.
///
/// At least one of `timeout` or `max_retries` must be set, otherwise the wait
/// could run forever; [`PollSpec::new`] rejects that combination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollSpec {
    interval: Duration,
    timeout: Duration,
    max_retries: u32,
}

impl PollSpec {
    /// Build a validated spec.
    ///
    /// * `interval` - time between checks, non-zero and at most [`MAX_INTERVAL`]
    /// * `timeout` - wall-clock budget, `Duration::ZERO` disables it
    /// * `max_retries` - evaluation budget, `0` disables it
    pub fn new(interval: Duration, timeout: Duration, max_retries: u32) -> Result<Self, Error> {
        if interval.is_zero() {
            return Err(Error::validation_for_field(
                "interval",
                "poll interval must be greater than zero",
            ));
        }
        if interval > MAX_INTERVAL {
            return Err(Error::validation_for_field(
                "interval",
                format!("poll interval must be at most {:?}", MAX_INTERVAL),
            ));
        }
        if timeout.is_zero() && max_retries == 0 {
            return Err(Error::validation(
                "poll spec needs a timeout or a retry limit, both are disabled",
            ));
        }
        Ok(Self {
            interval,
            timeout,
            max_retries,
        })
    }

    /// Spec bounded only by wall-clock time
    pub fn with_timeout(interval: Duration, timeout: Duration) -> Result<Self, Error> {
        Self::new(interval, timeout, 0)
    }

    /// Spec bounded only by the number of checks
    pub fn with_retries(interval: Duration, max_retries: u32) -> Result<Self, Error> {
        Self::new(interval, Duration::ZERO, max_retries)
    }

    /// Time between checks
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wall-clock budget, `None` when disabled
    pub fn timeout(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }

    /// Evaluation budget, `None` when disabled
    pub fn max_retries(&self) -> Option<u32> {
        (self.max_retries > 0).then_some(self.max_retries)
    }

    fn deadline_from(&self, start: Instant) -> Option<Instant> {
        self.timeout().and_then(|t| start.checked_add(t))
    }

    fn retries_exhausted(&self, evaluations: u32) -> bool {
        self.max_retries().is_some_and(|max| evaluations >= max)
    }
}

/// Outcome of one check.
///
/// `T` is the payload carried out of a successful wait; plain readiness checks
/// use `()`, endpoint probes carry the live connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Readiness<T = ()> {
    /// Not there yet, keep waiting
    Pending,
    /// Condition met
    Ready(T),
    /// The resource reached a state it will not recover from
    Failed(String),
}

impl<T> Readiness<T> {
    /// Shorthand for a terminal failure
    pub fn failed(reason: impl Into<String>) -> Self {
        Readiness::Failed(reason.into())
    }

    /// Whether the check reported success
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready(_))
    }

    /// Map the ready payload
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Readiness<U> {
        match self {
            Readiness::Pending => Readiness::Pending,
            Readiness::Ready(v) => Readiness::Ready(f(v)),
            Readiness::Failed(reason) => Readiness::Failed(reason),
        }
    }
}

/// Why a bounded wait ended without success.
#[derive(Debug, Error)]
pub enum WaitError {
    /// The check reported a terminal failure
    #[error("{target} reached a failed state after {evaluations} checks: {reason}")]
    PredicateFailed {
        /// What was being waited on
        target: String,
        /// Failure reason reported by the check
        reason: String,
        /// Checks performed, including the failing one
        evaluations: u32,
    },

    /// The wall-clock budget ran out
    #[error(
        "timed out after {timeout:?} waiting for {target} ({evaluations} checks){}",
        cause_suffix(.last_error)
    )]
    Timeout {
        /// What was being waited on
        target: String,
        /// The configured budget
        timeout: Duration,
        /// Checks performed before the deadline
        evaluations: u32,
        /// Last transient error seen, if any
        #[source]
        last_error: Option<Box<Error>>,
    },

    /// The evaluation budget ran out
    #[error(
        "{target} not ready after {evaluations} checks{}",
        cause_suffix(.last_error)
    )]
    RetriesExhausted {
        /// What was being waited on
        target: String,
        /// Checks performed
        evaluations: u32,
        /// Last transient error seen, if any
        #[source]
        last_error: Option<Box<Error>>,
    },

    /// The final allowed check failed to query the resource
    #[error("checking {target} failed on final check {evaluations}: {source}")]
    Query {
        /// What was being waited on
        target: String,
        /// Checks performed
        evaluations: u32,
        /// The query error from the last check
        #[source]
        source: Box<Error>,
    },

    /// The caller cancelled the wait
    #[error("wait for {target} cancelled after {evaluations} checks")]
    Cancelled {
        /// What was being waited on
        target: String,
        /// Checks performed before cancellation
        evaluations: u32,
    },
}

fn cause_suffix(cause: &Option<Box<Error>>) -> String {
    match cause {
        Some(e) => format!(", last error: {}", e),
        None => String::new(),
    }
}

impl WaitError {
    /// The resource or endpoint the wait was for
    pub fn target(&self) -> &str {
        match self {
            WaitError::PredicateFailed { target, .. }
            | WaitError::Timeout { target, .. }
            | WaitError::RetriesExhausted { target, .. }
            | WaitError::Query { target, .. }
            | WaitError::Cancelled { target, .. } => target,
        }
    }

    /// Number of checks performed before the wait ended
    pub fn evaluations(&self) -> u32 {
        match self {
            WaitError::PredicateFailed { evaluations, .. }
            | WaitError::Timeout { evaluations, .. }
            | WaitError::RetriesExhausted { evaluations, .. }
            | WaitError::Query { evaluations, .. }
            | WaitError::Cancelled { evaluations, .. } => *evaluations,
        }
    }

    /// Short name of the stopping condition, for logs
    pub fn reason(&self) -> &'static str {
        match self {
            WaitError::PredicateFailed { .. } => "failed",
            WaitError::Timeout { .. } => "timeout",
            WaitError::RetriesExhausted { .. } => "retries_exhausted",
            WaitError::Query { .. } => "query_error",
            WaitError::Cancelled { .. } => "cancelled",
        }
    }
}

/// Wait until `check` reports ready.
///
/// See [`wait_for_value`] for the full contract.
pub async fn wait_for<F, Fut>(
    target: &str,
    spec: &PollSpec,
    cancel: &CancellationToken,
    check: F,
) -> Result<(), WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Readiness, Error>>,
{
    wait_for_value(target, spec, cancel, check).await
}

/// Wait until `check` reports ready and return the value it carried.
///
/// * The first check runs one `interval` after the call, then on a fixed
///   cadence. A slow check pushes the next tick back instead of causing a
///   burst of catch-up checks.
/// * `Ready` ends the wait immediately. `Failed` ends it with
///   [`WaitError::PredicateFailed`] without consuming further checks.
/// * `Err` from the check is a transient query failure: logged, counted as a
///   pending check, and kept as the last cause. If the retry budget runs out
///   on an erroring check, that error is returned as [`WaitError::Query`].
/// * The deadline is checked while sleeping and while a check is in flight;
///   an in-flight check is dropped when it passes. When a tick and the
///   deadline land on the same instant the tick is evaluated first.
/// * Cancellation is observed at every await point.
pub async fn wait_for_value<T, F, Fut>(
    target: &str,
    spec: &PollSpec,
    cancel: &CancellationToken,
    check: F,
) -> Result<T, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Readiness<T>, Error>>,
{
    let span = tracing::debug_span!("wait", target = %target);
    run(target, spec, cancel, check).instrument(span).await
}

async fn run<T, F, Fut>(
    target: &str,
    spec: &PollSpec,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<T, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Readiness<T>, Error>>,
{
    let start = Instant::now();
    let deadline = spec.deadline_from(start);
    // unreachable with a validated interval unless the clock is near its end
    let first_tick = start.checked_add(spec.interval()).unwrap_or(start);
    let mut ticks = tokio::time::interval_at(first_tick, spec.interval());
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut evaluations = 0u32;
    let mut last_error: Option<Box<Error>> = None;

    let cancelled = |evaluations| WaitError::Cancelled {
        target: target.to_string(),
        evaluations,
    };
    let timed_out = |evaluations, last_error| WaitError::Timeout {
        target: target.to_string(),
        timeout: spec.timeout,
        evaluations,
        last_error,
    };

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(evaluations)),
            _ = ticks.tick() => {}
            _ = sleep_until(deadline) => return Err(timed_out(evaluations, last_error)),
        }

        evaluations += 1;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(evaluations - 1)),
            outcome = check() => outcome,
            _ = sleep_until(deadline) => return Err(timed_out(evaluations - 1, last_error)),
        };

        match outcome {
            Ok(Readiness::Ready(value)) => {
                debug!(evaluations, elapsed_ms = start.elapsed().as_millis(), "condition met");
                return Ok(value);
            }
            Ok(Readiness::Failed(reason)) => {
                warn!(evaluations, reason = %reason, "check reported terminal failure");
                return Err(WaitError::PredicateFailed {
                    target: target.to_string(),
                    reason,
                    evaluations,
                });
            }
            Ok(Readiness::Pending) => {
                trace!(evaluations, "condition not yet met");
            }
            Err(e) => {
                warn!(evaluations, error = %e, "check failed, treating as pending");
                if spec.retries_exhausted(evaluations) {
                    return Err(WaitError::Query {
                        target: target.to_string(),
                        evaluations,
                        source: Box::new(e),
                    });
                }
                last_error = Some(Box::new(e));
            }
        }

        if spec.retries_exhausted(evaluations) {
            return Err(WaitError::RetriesExhausted {
                target: target.to_string(),
                evaluations,
                last_error,
            });
        }
    }
}

/// Sleep until the deadline, or forever when there is none.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
