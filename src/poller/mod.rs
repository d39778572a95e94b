//! Bounded polling for eventually-consistent control-plane state.
//!
//! A [`Poller`] repeatedly runs a fetch operation and evaluates a predicate
//! over each fresh snapshot. It sleeps a fixed interval (plus optional jitter)
//! between attempts and gives up once the attempt budget or deadline is
//! exhausted, or when its cancellation token fires.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::RemoteError;

pub mod predicates;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_MAX_ATTEMPTS: u32 = 120;

/// Timing and budget for a wait.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Fixed delay between attempts.
    pub interval: Duration,
    /// Upper bound of a uniformly random delay added to each sleep.
    pub jitter: Duration,
    /// Maximum number of fetches; `None` polls until satisfied.
    pub max_attempts: Option<u32>,
    /// Wall-clock budget measured from the first fetch.
    pub deadline: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            jitter: Duration::ZERO,
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
            deadline: None,
        }
    }
}

impl PollPolicy {
    /// Policy that polls until satisfied or until a remote error occurs.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            jitter: Duration::ZERO,
            max_attempts: None,
            deadline: None,
        }
    }

    /// Overrides the polling interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Overrides the jitter bound.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Overrides the attempt budget.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Overrides the wall-clock deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    fn next_delay(&self) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter_ms == 0 {
            return self.interval;
        }
        let extra = rand::rng().random_range(0..=jitter_ms);
        self.interval.saturating_add(Duration::from_millis(extra))
    }

    fn exhausted(&self, attempts: u32, started: Instant) -> bool {
        if self.max_attempts.is_some_and(|max| attempts >= max) {
            return true;
        }
        self.deadline
            .is_some_and(|deadline| started.elapsed() >= deadline)
    }
}

/// A snapshot that satisfied the predicate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Polled<T> {
    /// The satisfying snapshot.
    pub value: T,
    /// Number of fetches performed, including the satisfying one.
    pub attempts: u32,
}

/// Errors raised while waiting.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PollError {
    /// A fetch failed; the wait stops immediately.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// The predicate never held within the attempt budget or deadline.
    #[error("timed out waiting for {what} after {attempts} attempts ({elapsed:?})")]
    Timeout {
        /// Description of the awaited condition.
        what: String,
        /// Fetches performed.
        attempts: u32,
        /// Time spent waiting.
        elapsed: Duration,
    },
    /// The cancellation token fired.
    #[error("cancelled while waiting for {what} after {attempts} attempts")]
    Cancelled {
        /// Description of the awaited condition.
        what: String,
        /// Fetches performed.
        attempts: u32,
    },
}

/// Fixed-interval retry-until-predicate primitive.
#[derive(Clone, Debug)]
pub struct Poller {
    policy: PollPolicy,
    cancel: CancellationToken,
}

impl Poller {
    /// Creates a poller with its own cancellation token.
    #[must_use]
    pub fn new(policy: PollPolicy) -> Self {
        Self {
            policy,
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the cancellation token, typically with a child of a
    /// process-wide shutdown token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Policy in effect.
    #[must_use]
    pub const fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Token observed between attempts.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fetches until `predicate` holds for the fetched snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Remote`] on the first failed fetch,
    /// [`PollError::Timeout`] when the budget runs out and
    /// [`PollError::Cancelled`] when the token fires.
    pub async fn wait_for<T, F, Fut, P>(
        &self,
        what: &str,
        mut fetch: F,
        predicate: P,
    ) -> Result<Polled<T>, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
        P: Fn(&T) -> bool,
    {
        let started = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(self.cancelled(what, attempts));
            }

            let snapshot = fetch().await?;
            attempts = attempts.saturating_add(1);

            if predicate(&snapshot) {
                info!(what, attempts, "condition satisfied");
                return Ok(Polled {
                    value: snapshot,
                    attempts,
                });
            }

            if self.policy.exhausted(attempts, started) {
                return Err(PollError::Timeout {
                    what: what.to_owned(),
                    attempts,
                    elapsed: started.elapsed(),
                });
            }

            let delay = self.policy.next_delay();
            debug!(what, attempts, ?delay, "condition not met yet");
            tokio::select! {
                () = self.cancel.cancelled() => return Err(self.cancelled(what, attempts)),
                () = sleep(delay) => {}
            }
        }
    }

    fn cancelled(&self, what: &str, attempts: u32) -> PollError {
        debug!(what, attempts, policy = ?self.policy, "wait cancelled");
        PollError::Cancelled {
            what: what.to_owned(),
            attempts,
        }
    }
}

#[cfg(test)]
mod tests;
