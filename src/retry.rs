//! Retry classification and exponential backoff for API and page requests.

use super::MangadexError;
use rand::Rng;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
const MAX_JITTER: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Network hiccup, timeout, 408 or 5xx. Worth another try.
    Transient,
    /// HTTP 429.
    RateLimited,
    /// Anything a retry cannot fix: 4xx, bad payloads, local IO.
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration, attempt: u32 },
    DoNotRetry { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// `max_attempts` counts the first try, so it is clamped to at least 1.
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide what to do after `attempt` (1-indexed) failed.
    ///
    /// `retry_after` is the wait the server asked for, if any. It replaces the
    /// computed backoff but is still capped by the policy's maximum delay.
    pub fn should_retry(
        &self,
        failure: FailureType,
        attempt: u32,
        retry_after: Option<Duration>,
    ) -> RetryDecision {
        if failure == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure".to_string(),
            };
        }
        if attempt >= self.max_attempts {
            return RetryDecision::DoNotRetry {
                reason: format!("gave up after {} attempts", self.max_attempts),
            };
        }

        let delay = match retry_after {
            Some(wait) => wait.min(self.max_delay),
            None => self.backoff(attempt),
        };
        debug!(?failure, attempt, delay_ms = delay.as_millis() as u64, "will retry");
        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay_ms = self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64) + self.jitter()
    }

    fn jitter(&self) -> Duration {
        let bound = MAX_JITTER.min(self.base_delay).as_millis() as u64;
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=bound))
    }
}

pub fn classify_status(status: StatusCode) -> FailureType {
    match status {
        StatusCode::TOO_MANY_REQUESTS => FailureType::RateLimited,
        StatusCode::REQUEST_TIMEOUT => FailureType::Transient,
        s if s.is_server_error() => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

pub fn classify_error(error: &MangadexError) -> FailureType {
    match error {
        MangadexError::RequestError(e) => match e.status() {
            Some(status) => classify_status(status),
            None if e.is_builder() || e.is_redirect() || e.is_decode() => FailureType::Permanent,
            None => FailureType::Transient,
        },
        MangadexError::Api { status, .. } => StatusCode::from_u16(*status)
            .map(classify_status)
            .unwrap_or(FailureType::Permanent),
        MangadexError::ChecksumMismatch { .. } => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}
