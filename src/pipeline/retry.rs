//! Exponential backoff for the fetch and relay collaborators
//!
//! The orchestrator never retries; transient failures are absorbed here, inside
//! the collaborator that saw them. Each failure is classified first:
//! - [`FailureType::Transient`] - timeouts, connection failures, 5xx, 408
//! - [`FailureType::RateLimited`] - HTTP 429, retried like transient ones
//! - [`FailureType::Permanent`] - everything else, never retried

use rand::Rng;
use std::future::Future;
use std::time::Duration;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification of a collaborator failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    Transient,
    RateLimited,
    Permanent,
}

impl FailureType {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }
}

/// One failed attempt with its classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptError {
    pub kind: FailureType,
    pub message: String,
}

impl AttemptError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureType::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureType::Permanent,
            message: message.into(),
        }
    }

    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: classify_http_status(status),
            message: message.into(),
        }
    }

    pub fn network(error: &reqwest::Error) -> Self {
        Self {
            kind: classify_reqwest_error(error),
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Decision after a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration, attempt: u32 },
    DoNotRetry { reason: String },
}

/// Bounded exponential backoff with jitter
///
/// `delay = min(base * multiplier^(attempt-1), max) + jitter`, giving roughly
/// 1s, 2s, 4s with the defaults.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Policy without waits, for tests against local mock servers
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether attempt number `attempt` (1-indexed) should be followed by another
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if !failure_type.is_retryable() {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        RetryDecision::Retry {
            delay: self.calculate_delay(attempt),
            attempt: attempt + 1,
        }
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exponent = attempt.saturating_sub(1) as f64;
        let delay_ms = base_ms * (self.backoff_multiplier as f64).powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        let jitter = if self.jitter {
            let jitter_ms = rand::thread_rng().gen_range(0..=MAX_JITTER.as_millis() as u64);
            Duration::from_millis(jitter_ms)
        } else {
            Duration::ZERO
        };

        Duration::from_millis(capped_ms as u64) + jitter
    }

    /// Runs `operation` until it succeeds, fails permanently or runs out of attempts
    ///
    /// `classify` maps an error to its [`FailureType`]; the last error is returned.
    pub async fn run<T, E, F, Fut, C>(&self, label: &str, mut operation: F, classify: C) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> FailureType,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => match self.should_retry(classify(&error), attempt) {
                    RetryDecision::Retry {
                        delay,
                        attempt: next,
                    } => {
                        tracing::debug!(
                            attempt,
                            next_attempt = next,
                            delay_ms = delay.as_millis() as u64,
                            "{} failed, will retry: {}",
                            label,
                            error
                        );
                        tokio::time::sleep(delay).await;
                        attempt = next;
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        tracing::debug!(attempt, "{} failed, not retrying ({})", label, reason);
                        return Err(error);
                    }
                },
            }
        }
    }
}

/// Classifies an HTTP status code
pub fn classify_http_status(status: u16) -> FailureType {
    match status {
        408 => FailureType::Transient,
        429 => FailureType::RateLimited,
        500..=599 => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

/// Classifies a reqwest error from a send or body read
pub fn classify_reqwest_error(error: &reqwest::Error) -> FailureType {
    if let Some(status) = error.status() {
        classify_http_status(status.as_u16())
    } else if error.is_builder() {
        FailureType::Permanent
    } else {
        FailureType::Transient
    }
}
