//! Retry policy and the rotating retry loop
//!
//! Both the RPC submitter and the bundle relay client drive their attempts
//! through [`run_with_rotation`]: a bounded number of attempts, each bound to
//! an endpoint index chosen from the policy, with exponential backoff between
//! attempts and the caller's deadline checked before every sleep.

use crate::types::Deadline;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Errors that know whether another attempt could succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Retry policy shared by every rotating retry loop
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts across all endpoints
    pub max_attempts: u32,

    /// Consecutive attempts spent on one endpoint before moving to the next
    pub attempts_per_endpoint: u32,

    /// Delay after the first failed attempt
    pub base_delay: Duration,

    /// Growth factor applied per failed attempt
    pub multiplier: f64,

    /// Upper bound for a single delay (before jitter)
    pub max_delay: Duration,

    /// Relative jitter (0.0 disables it)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempts_per_endpoint: 1,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Policy for ledger submission: `per_endpoint` attempts on each endpoint,
    /// cycling through all of them once
    pub fn rpc_submission(endpoint_count: usize, per_endpoint: u32) -> Self {
        let per_endpoint = per_endpoint.max(1);
        Self {
            max_attempts: per_endpoint.saturating_mul(endpoint_count.max(1) as u32),
            attempts_per_endpoint: per_endpoint,
            base_delay: Duration::from_millis(200),
            multiplier: 2.0,
            max_delay: Duration::from_secs(2),
            jitter_factor: 0.1,
        }
    }

    /// Policy for relay calls: rotate endpoint on every failed attempt
    pub fn relay(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            attempts_per_endpoint: 1,
            base_delay,
            multiplier: 2.0,
            max_delay,
            jitter_factor: 0.1,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }

    /// Largest jitter that keeps uncapped delays strictly increasing
    pub fn max_monotonic_jitter(multiplier: f64) -> f64 {
        if multiplier <= 1.0 {
            0.0
        } else {
            (multiplier - 1.0) / (multiplier + 1.0)
        }
    }

    /// Endpoint index for a zero-based attempt number
    pub fn endpoint_for(&self, attempt: u32, endpoint_count: usize) -> usize {
        if endpoint_count == 0 {
            return 0;
        }
        let per_endpoint = self.attempts_per_endpoint.max(1);
        (attempt / per_endpoint) as usize % endpoint_count
    }

    /// Delay to wait after the zero-based `attempt` failed
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = (base_ms * self.multiplier.powi(attempt as i32)).min(max_ms);

        let jitter = if self.jitter_factor > 0.0 {
            (rand::random::<f64>() - 0.5) * 2.0 * self.jitter_factor
        } else {
            0.0
        };
        let jittered = (delay_ms * (1.0 + jitter)).max(0.0) as u64;

        Duration::from_millis(jittered)
    }
}

/// Position of one attempt inside a rotating retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptContext {
    /// Zero-based attempt number
    pub attempt: u32,
    /// Index of the endpoint this attempt must use
    pub endpoint: usize,
}

/// Why a rotating retry loop gave up
#[derive(Debug, PartialEq)]
pub enum RetryError<E> {
    /// A non-retryable error; returned immediately
    Fatal { attempt: u32, endpoint: usize, error: E },

    /// Every allowed attempt failed with a retryable error
    Exhausted { attempts: u32, endpoint: usize, error: E },

    /// The caller's deadline would pass before the next attempt
    DeadlineExceeded { attempts: u32, last: Option<(usize, E)> },

    /// Nothing to rotate through
    NoEndpoints,
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Fatal { attempt, .. } => attempt + 1,
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::DeadlineExceeded { attempts, .. } => *attempts,
            RetryError::NoEndpoints => 0,
        }
    }
}

/// Run `op` until it succeeds, fails fatally, runs out of attempts or the
/// deadline would be passed.
///
/// `op` receives the attempt number and the endpoint index it must use.
pub async fn run_with_rotation<T, E, F, Fut>(
    policy: &RetryPolicy,
    endpoint_count: usize,
    deadline: Deadline,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Retryable + std::fmt::Display,
    F: FnMut(AttemptContext) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    if endpoint_count == 0 {
        return Err(RetryError::NoEndpoints);
    }

    let max_attempts = policy.max_attempts.max(1);
    let mut last: Option<(usize, E)> = None;
    let mut attempt = 0u32;

    loop {
        if deadline.is_expired() {
            return Err(RetryError::DeadlineExceeded {
                attempts: attempt,
                last,
            });
        }

        let endpoint = policy.endpoint_for(attempt, endpoint_count);
        let error = match op(AttemptContext { attempt, endpoint }).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !error.is_retryable() {
            return Err(RetryError::Fatal {
                attempt,
                endpoint,
                error,
            });
        }

        if attempt + 1 >= max_attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt + 1,
                endpoint,
                error,
            });
        }

        let delay = policy.delay_for(attempt);
        if delay >= deadline.remaining() {
            return Err(RetryError::DeadlineExceeded {
                attempts: attempt + 1,
                last: Some((endpoint, error)),
            });
        }

        debug!(
            attempt = attempt,
            endpoint = endpoint,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying after transient failure"
        );

        tokio::time::sleep(delay).await;
        last = Some((endpoint, error));
        attempt += 1;
    }
}
