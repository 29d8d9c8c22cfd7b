//! Convergence polling for changes GitHub applies asynchronously.
//!
//! Unique responsibility: poll the status of an accepted operation at a fixed
//! interval until it reaches a terminal status, the attempt budget runs out,
//! or the caller's deadline passes.
//!
//! The loop never runs past the deadline: it is checked before every poll,
//! the last sleep is shortened to end exactly at it, and a status request
//! still in flight when it passes is abandoned.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::github_config::{self, ConfigError};
use crate::github_remote::{PollHandle, PollStatus, RemoteError, RemoteResource};

/// Interval and budget for convergence polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between two polls.
    /// Env: `GITHUB_POLL_INTERVAL_MS` (default: 3000)
    pub interval: Duration,

    /// Maximum number of polls.
    /// Env: `GITHUB_POLL_MAX_ATTEMPTS` (default: 20)
    pub max_attempts: u32,

    /// Overall time budget per operation, on top of any caller deadline.
    /// Env: `GITHUB_POLL_TIMEOUT_MS` (optional)
    pub timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_attempts: 20,
            timeout: None,
        }
    }
}

impl PollPolicy {
    /// Policy with the given interval and attempt budget, no overall timeout.
    #[must_use]
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            timeout: None,
        }
    }

    /// Add an overall time budget.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Load the policy from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but not an unsigned integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        github_config::load_dotenv();

        Ok(Self {
            interval: Duration::from_millis(github_config::parse_u64_env("GITHUB_POLL_INTERVAL_MS", 3_000)?),
            max_attempts: github_config::parse_u32_env("GITHUB_POLL_MAX_ATTEMPTS", 20)?,
            timeout: github_config::parse_opt_u64_env("GITHUB_POLL_TIMEOUT_MS")?.map(Duration::from_millis),
        })
    }

    /// Earliest of the caller's deadline and `start + timeout`.
    fn effective_deadline(&self, start: Instant, deadline: Option<Instant>) -> Option<Instant> {
        let own = self.timeout.and_then(|t| start.checked_add(t));
        match (own, deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Why polling stopped without success.
#[derive(Debug, Error)]
pub enum PollError {
    /// The operation reached a failed, cancelled or timed-out status.
    #[error("operation ended with status {status:?} after {attempts} polls")]
    Failed {
        /// Terminal status observed.
        status: PollStatus,
        /// Polls issued.
        attempts: u32,
    },
    /// The budget or deadline ran out while the operation was still pending.
    #[error("operation still pending after {attempts} polls (last status: {last:?})")]
    Timeout {
        /// Polls issued.
        attempts: u32,
        /// Last status observed, if any poll completed.
        last: Option<PollStatus>,
    },
    /// A status request itself failed.
    #[error("status request failed: {0}")]
    Remote(#[source] RemoteError),
}

/// Poll `handle` until it converges.
///
/// Returns the number of polls issued on success.
///
/// # Errors
///
/// See [`PollError`].
pub async fn poll_until_converged<R>(
    resource: &R,
    handle: &PollHandle,
    policy: &PollPolicy,
    deadline: Option<Instant>,
) -> Result<u32, PollError>
where
    R: RemoteResource + ?Sized,
{
    let deadline = policy.effective_deadline(Instant::now(), deadline);
    let mut attempts: u32 = 0;
    let mut last: Option<PollStatus> = None;

    while attempts < policy.max_attempts {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }

        attempts = attempts.saturating_add(1);
        let Some(polled) = poll_before(resource, handle, deadline).await else {
            tracing::debug!(
                kind = resource.kind(),
                identity = %handle.identity,
                operation = %handle.operation_id,
                attempt = attempts,
                "deadline passed while polling"
            );
            return Err(PollError::Timeout { attempts, last });
        };
        let status = polled.map_err(PollError::Remote)?;
        tracing::debug!(
            kind = resource.kind(),
            identity = %handle.identity,
            operation = %handle.operation_id,
            attempt = attempts,
            ?status,
            "polled asynchronous operation"
        );

        if status.is_success() {
            return Ok(attempts);
        }
        if status.is_terminal() {
            return Err(PollError::Failed { status, attempts });
        }
        last = Some(status);

        if attempts >= policy.max_attempts {
            break;
        }

        let wake = Instant::now() + policy.interval;
        tokio::time::sleep_until(deadline.map_or(wake, |d| wake.min(d))).await;
    }

    Err(PollError::Timeout { attempts, last })
}

/// One status request, abandoned (`None`) if `deadline` passes first.
async fn poll_before<R>(
    resource: &R,
    handle: &PollHandle,
    deadline: Option<Instant>,
) -> Option<Result<PollStatus, RemoteError>>
where
    R: RemoteResource + ?Sized,
{
    match deadline {
        Some(d) => tokio::time::timeout_at(d, resource.poll_status(handle)).await.ok(),
        None => Some(resource.poll_status(handle).await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::github_cache::{ConditionalRead, ValidationToken};
    use crate::github_identity::ResourceIdentity;
    use crate::github_remote::{MutateOp, MutateOutcome, RemoteSnapshot};
    use crate::github_state::DesiredState;

    /// Returns the scripted statuses in order, then repeats the last one.
    /// Each status request takes `latency`.
    struct Scripted {
        statuses: Mutex<Vec<PollStatus>>,
        polls: Mutex<u32>,
        latency: Duration,
    }

    impl Scripted {
        fn new(mut statuses: Vec<PollStatus>) -> Self {
            statuses.reverse();
            Self {
                statuses: Mutex::new(statuses),
                polls: Mutex::new(0),
                latency: Duration::ZERO,
            }
        }

        fn slow(statuses: Vec<PollStatus>, latency: Duration) -> Self {
            Self {
                latency,
                ..Self::new(statuses)
            }
        }

        fn polls(&self) -> u32 {
            *self.polls.lock().unwrap()
        }
    }

    #[async_trait]
    impl RemoteResource for Scripted {
        fn kind(&self) -> &'static str {
            "scripted"
        }

        async fn get(
            &self,
            _identity: &ResourceIdentity,
            _token: Option<&ValidationToken>,
        ) -> Result<ConditionalRead<RemoteSnapshot>, RemoteError> {
            Err(RemoteError::Unsupported("get"))
        }

        async fn mutate(&self, _op: MutateOp<'_>, _desired: &DesiredState) -> Result<MutateOutcome, RemoteError> {
            Err(RemoteError::Unsupported("mutate"))
        }

        async fn poll_status(&self, _handle: &PollHandle) -> Result<PollStatus, RemoteError> {
            *self.polls.lock().unwrap() += 1;
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let mut statuses = self.statuses.lock().unwrap();
            let status = if statuses.len() > 1 { statuses.pop() } else { statuses.last().copied() };
            Ok(status.unwrap_or(PollStatus::Pending))
        }

        async fn delete(&self, _identity: &ResourceIdentity) -> Result<(), RemoteError> {
            Err(RemoteError::Unsupported("delete"))
        }
    }

    fn handle() -> PollHandle {
        PollHandle {
            identity: ResourceIdentity::new("octo:hello"),
            operation_id: "99".into(),
            url: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn converges_after_in_progress() {
        let remote = Scripted::new(vec![
            PollStatus::Pending,
            PollStatus::InProgress,
            PollStatus::InProgress,
            PollStatus::Succeeded,
        ]);
        let policy = PollPolicy::new(Duration::from_secs(3), 10);

        let start = Instant::now();
        let attempts = poll_until_converged(&remote, &handle(), &policy, None).await.unwrap();

        assert_eq!(attempts, 4);
        assert_eq!(remote.polls(), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_failure_stops_polling() {
        let remote = Scripted::new(vec![PollStatus::InProgress, PollStatus::Cancelled]);
        let policy = PollPolicy::new(Duration::from_secs(3), 10);

        let err = poll_until_converged(&remote, &handle(), &policy, None).await.unwrap_err();
        assert!(matches!(
            err,
            PollError::Failed {
                status: PollStatus::Cancelled,
                attempts: 2
            }
        ));
        assert_eq!(remote.polls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_budget_exhausted() {
        let remote = Scripted::new(vec![PollStatus::Pending]);
        let policy = PollPolicy::new(Duration::from_secs(3), 3);

        let start = Instant::now();
        let err = poll_until_converged(&remote, &handle(), &policy, None).await.unwrap_err();
        assert!(matches!(
            err,
            PollError::Timeout {
                attempts: 3,
                last: Some(PollStatus::Pending)
            }
        ));
        assert_eq!(remote.polls(), 3);
        // No sleep after the final attempt.
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cuts_the_last_sleep_short() {
        let remote = Scripted::new(vec![PollStatus::Pending]);
        let policy = PollPolicy::new(Duration::from_secs(3), 100);

        let start = Instant::now();
        let deadline = start + Duration::from_secs(7);
        let err = poll_until_converged(&remote, &handle(), &policy, Some(deadline))
            .await
            .unwrap_err();

        // Polls at t=0, 3, 6; wakes at the deadline (t=7) and stops.
        assert!(matches!(err, PollError::Timeout { attempts: 3, .. }));
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn policy_timeout_acts_as_deadline() {
        let remote = Scripted::new(vec![PollStatus::InProgress]);
        let policy = PollPolicy::new(Duration::from_secs(3), 100).with_timeout(Duration::from_secs(4));

        let err = poll_until_converged(&remote, &handle(), &policy, None).await.unwrap_err();
        assert!(matches!(err, PollError::Timeout { attempts: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn past_deadline_never_polls() {
        let remote = Scripted::new(vec![PollStatus::Succeeded]);
        let policy = PollPolicy::default();

        let err = poll_until_converged(&remote, &handle(), &policy, Some(Instant::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::Timeout { attempts: 0, last: None }));
        assert_eq!(remote.polls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_status_request_is_cut_at_the_deadline() {
        let remote = Scripted::slow(vec![PollStatus::Succeeded], Duration::from_secs(60));
        let policy = PollPolicy::new(Duration::from_secs(3), 10);

        let start = Instant::now();
        let err = poll_until_converged(&remote, &handle(), &policy, Some(start + Duration::from_secs(5)))
            .await
            .unwrap_err();

        assert!(matches!(err, PollError::Timeout { attempts: 1, last: None }));
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_status_request_without_deadline_completes() {
        let remote = Scripted::slow(vec![PollStatus::Succeeded], Duration::from_secs(60));
        let policy = PollPolicy::new(Duration::from_secs(3), 10);

        let attempts = poll_until_converged(&remote, &handle(), &policy, None).await.unwrap();
        assert_eq!(attempts, 1);
    }

    #[test]
    fn poll_errors_render() {
        let err = PollError::Failed {
            status: PollStatus::Cancelled,
            attempts: 2,
        };
        assert_eq!(err.to_string(), "operation ended with status Cancelled after 2 polls");
    }
}
