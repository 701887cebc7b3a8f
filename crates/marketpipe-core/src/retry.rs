//! Retry classification and exponential backoff with additive jitter.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use crate::http_client::{HttpError, HttpErrorKind};
use crate::Symbol;

/// Why a single upstream attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// The request exceeded its per-attempt timeout.
    Timeout(String),
    /// The connection could not be established.
    Connect(String),
    /// Any other transport-level failure (reset, broken body, ...).
    Transport(String),
    /// The upstream answered with a non-success HTTP status.
    Status { status: u16 },
    /// The body could not be interpreted as a price payload.
    Malformed(String),
    /// The payload did not contain the requested identifier.
    NotFound { identifier: String },
    /// The process-local upstream quota had no budget left.
    QuotaExhausted,
}

impl Display for FetchFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout(message) => write!(f, "timeout: {message}"),
            Self::Connect(message) => write!(f, "connection failed: {message}"),
            Self::Transport(message) => write!(f, "transport error: {message}"),
            Self::Status { status } => write!(f, "upstream returned status {status}"),
            Self::Malformed(message) => write!(f, "malformed response: {message}"),
            Self::NotFound { identifier } => {
                write!(f, "upstream has no price for '{identifier}'")
            }
            Self::QuotaExhausted => f.write_str("local upstream quota exhausted"),
        }
    }
}

impl FetchFailure {
    /// HTTP status of the upstream answer, when there was one.
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status } => Some(*status),
            _ => None,
        }
    }
}

impl From<HttpError> for FetchFailure {
    fn from(error: HttpError) -> Self {
        let message = error.message().to_owned();
        match error.kind() {
            HttpErrorKind::Timeout => Self::Timeout(message),
            HttpErrorKind::Connect => Self::Connect(message),
            HttpErrorKind::Other => Self::Transport(message),
        }
    }
}

/// Result of one attempt after classification by a [`BackoffPolicy`].
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome<T> {
    Success(T),
    Retryable(FetchFailure),
    Terminal(FetchFailure),
}

/// What happened on one attempt, as reported to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptStatus {
    Succeeded,
    /// Failed but another attempt follows after `RetryAttempt::computed_delay`.
    WillRetry(FetchFailure),
    /// Retryable failure on the last permitted attempt.
    Exhausted(FetchFailure),
    /// Non-retryable failure; no further attempts.
    Terminal(FetchFailure),
}

/// Ephemeral record of one upstream call made by the fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAttempt {
    pub symbol: Symbol,
    /// Zero for the original call, `n` for the n-th retry.
    pub attempt_number: u32,
    /// Delay scheduled before the next attempt, if any.
    pub computed_delay: Option<Duration>,
    pub elapsed: Duration,
    pub status: AttemptStatus,
}

/// Exponential backoff: `min(cap, base * 2^attempt) + U[0, max_jitter]`.
///
/// `attempt` counts retries from zero, so the first retry waits roughly
/// `base` and the original call is never delayed.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// Upper bound of the additive, non-negative jitter.
    pub max_jitter: Duration,
    /// Retries after the original call; total calls = `max_retries + 1`.
    pub max_retries: u32,
    /// HTTP status codes that should trigger a retry.
    pub retry_on_status: Vec<u16>,
    pub retry_on_timeout: bool,
    pub retry_on_connect: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(5),
            max_jitter: Duration::from_millis(200),
            max_retries: 3,
            retry_on_status: vec![429, 500, 502, 503, 504],
            retry_on_timeout: true,
            retry_on_connect: true,
        }
    }
}

impl BackoffPolicy {
    /// Disable jitter, making delays fully deterministic.
    pub fn without_jitter(mut self) -> Self {
        self.max_jitter = Duration::ZERO;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Total number of calls, including the original one.
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Upper bound of any delay this policy can produce.
    pub fn max_delay(&self) -> Duration {
        self.cap.saturating_add(self.max_jitter)
    }

    /// Capped exponential delay without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        2_u32
            .checked_pow(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    /// Delay before retry number `attempt` (0-based), including jitter.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let jitter_nanos = u64::try_from(self.max_jitter.as_nanos()).unwrap_or(u64::MAX);
        let jitter = Duration::from_nanos(fastrand::u64(0..=jitter_nanos));
        self.base_delay(attempt).saturating_add(jitter)
    }

    /// Check if a given HTTP status code should trigger a retry.
    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retry_on_status.contains(&status)
    }

    pub fn is_retryable(&self, failure: &FetchFailure) -> bool {
        match failure {
            FetchFailure::Timeout(_) => self.retry_on_timeout,
            FetchFailure::Connect(_) => self.retry_on_connect,
            FetchFailure::Transport(_) | FetchFailure::QuotaExhausted => true,
            FetchFailure::Status { status } => self.should_retry_status(*status),
            FetchFailure::Malformed(_) | FetchFailure::NotFound { .. } => false,
        }
    }

    pub fn classify<T>(&self, result: Result<T, FetchFailure>) -> AttemptOutcome<T> {
        match result {
            Ok(value) => AttemptOutcome::Success(value),
            Err(failure) if self.is_retryable(&failure) => AttemptOutcome::Retryable(failure),
            Err(failure) => AttemptOutcome::Terminal(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_delay_doubles_until_cap() {
        let policy = BackoffPolicy::default();

        assert_eq!(policy.base_delay(0), Duration::from_millis(500));
        assert_eq!(policy.base_delay(1), Duration::from_secs(1));
        assert_eq!(policy.base_delay(2), Duration::from_secs(2));
        assert_eq!(policy.base_delay(3), Duration::from_secs(4));
        assert_eq!(policy.base_delay(4), Duration::from_secs(5)); // capped
        assert_eq!(policy.base_delay(40), Duration::from_secs(5));
    }

    #[test]
    fn test_jittered_delay_is_bounded_and_non_decreasing_in_floor() {
        let policy = BackoffPolicy::default();

        for _ in 0..50 {
            let mut previous_floor = Duration::ZERO;
            for attempt in 0..8 {
                let floor = policy.base_delay(attempt);
                let delay = policy.next_delay(attempt);

                assert!(floor >= previous_floor, "attempt={attempt}");
                assert!(delay >= floor, "attempt={attempt}, delay={delay:?}");
                assert!(delay <= floor + policy.max_jitter, "attempt={attempt}, delay={delay:?}");
                assert!(delay <= policy.max_delay());
                previous_floor = floor;
            }
        }
    }

    #[test]
    fn test_without_jitter_is_deterministic() {
        let policy = BackoffPolicy::default().without_jitter();
        assert_eq!(policy.next_delay(0), Duration::from_millis(500));
        assert_eq!(policy.next_delay(2), Duration::from_secs(2));
    }

    #[test]
    fn test_default_retryability() {
        let policy = BackoffPolicy::default();

        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.max_attempts(), 4);
        for status in [429, 500, 502, 503, 504] {
            assert!(policy.is_retryable(&FetchFailure::Status { status }), "{status}");
        }
        for status in [400, 401, 403, 404, 408, 422] {
            assert!(!policy.is_retryable(&FetchFailure::Status { status }), "{status}");
        }
        assert!(policy.is_retryable(&FetchFailure::Timeout(String::from("5s"))));
        assert!(policy.is_retryable(&FetchFailure::Connect(String::from("refused"))));
        assert!(policy.is_retryable(&FetchFailure::QuotaExhausted));
        assert!(!policy.is_retryable(&FetchFailure::Malformed(String::from("not json"))));
        assert!(!policy.is_retryable(&FetchFailure::NotFound {
            identifier: String::from("bitcoin"),
        }));
    }

    #[test]
    fn test_classify_maps_results_to_outcomes() {
        let policy = BackoffPolicy {
            retry_on_timeout: false,
            ..BackoffPolicy::default()
        };

        assert_eq!(policy.classify::<u8>(Ok(7)), AttemptOutcome::Success(7));
        assert_eq!(
            policy.classify::<u8>(Err(FetchFailure::Status { status: 503 })),
            AttemptOutcome::Retryable(FetchFailure::Status { status: 503 })
        );
        assert_eq!(
            policy.classify::<u8>(Err(FetchFailure::Timeout(String::from("slow")))),
            AttemptOutcome::Terminal(FetchFailure::Timeout(String::from("slow")))
        );
    }

    #[test]
    fn test_http_errors_map_to_failure_kinds() {
        assert!(matches!(
            FetchFailure::from(HttpError::timeout("deadline")),
            FetchFailure::Timeout(_)
        ));
        assert!(matches!(
            FetchFailure::from(HttpError::connect("refused")),
            FetchFailure::Connect(_)
        ));
        assert!(matches!(
            FetchFailure::from(HttpError::other("reset")),
            FetchFailure::Transport(_)
        ));
    }
}
