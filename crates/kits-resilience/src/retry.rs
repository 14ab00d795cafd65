//! ---
//! dr_section: "03-resilience"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Retry policies and kit health classification."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
//! Attempt loop shared by every remote step.
//!
//! The attempt timeout and the attempt budget are enforced independently: a
//! hung attempt is cut off by [`RetryPolicy::attempt_timeout`] and then
//! counts against [`RetryPolicy::max_attempts`] like any other failure.
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::policy::RetryPolicy;

/// Classifies errors into transient and permanent.
pub trait Retryable {
    /// Whether another attempt may succeed.
    fn is_retryable(&self) -> bool;
}

/// Failure of one attempt.
#[derive(Debug, Error)]
pub enum AttemptError<E>
where
    E: std::error::Error + 'static,
{
    /// The operation returned an error.
    #[error(transparent)]
    Failed(E),
    /// The operation did not finish within the attempt timeout.
    #[error("attempt timed out after {0:?}")]
    TimedOut(Duration),
}

impl<E> AttemptError<E>
where
    E: std::error::Error + 'static,
{
    /// The operation error, if the attempt did not time out.
    pub fn error(&self) -> Option<&E> {
        match self {
            AttemptError::Failed(err) => Some(err),
            AttemptError::TimedOut(_) => None,
        }
    }
}

/// Terminal outcome of a retried step.
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// A non-retryable error ended the step early.
    #[error("permanent failure on attempt {attempt}: {source}")]
    Permanent {
        /// Attempt that produced the error.
        attempt: u32,
        /// The error.
        #[source]
        source: E,
    },
    /// Every attempt in the budget failed.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Failure of the final attempt.
        #[source]
        last: AttemptError<E>,
    },
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Attempts consumed before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Permanent { attempt, .. } => *attempt,
            RetryError::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// The last operation error, if the step did not end on a timeout.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Permanent { source, .. } => Some(source),
            RetryError::Exhausted { last, .. } => last.error(),
        }
    }
}

/// Successful outcome together with the attempt that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome<T> {
    /// Value returned by the successful attempt.
    pub value: T,
    /// Attempt number that succeeded (1-indexed).
    pub attempts: u32,
}

/// Run `operation` under `policy`, logging every failed attempt against `step`.
///
/// The closure receives the 1-indexed attempt number.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    step: &str,
    mut operation: F,
) -> Result<RetryOutcome<T>, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + Retryable + 'static,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        debug!(target: "kits_dr::retry", step, attempt, max_attempts, "starting attempt");
        let failure = match timeout(policy.attempt_timeout, operation(attempt)).await {
            Ok(Ok(value)) => {
                return Ok(RetryOutcome {
                    value,
                    attempts: attempt,
                })
            }
            Ok(Err(err)) if !err.is_retryable() => {
                warn!(
                    target: "kits_dr::retry",
                    step,
                    attempt,
                    error = %err,
                    "permanent failure; not retrying",
                );
                return Err(RetryError::Permanent {
                    attempt,
                    source: err,
                });
            }
            Ok(Err(err)) => AttemptError::Failed(err),
            Err(_) => AttemptError::TimedOut(policy.attempt_timeout),
        };

        warn!(
            target: "kits_dr::retry",
            step,
            attempt,
            max_attempts,
            error = %failure,
            "attempt failed",
        );
        if attempt >= max_attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: failure,
            });
        }
        sleep(policy.delay_after(attempt)).await;
        attempt += 1;
    }
}
