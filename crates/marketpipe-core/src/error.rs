use std::fmt::{Display, Formatter};

use thiserror::Error;

use crate::retry::FetchFailure;
use crate::Symbol;

/// Validation and contract errors exposed by `marketpipe-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("unsupported symbol '{value}', expected one of BTC, ETH, SOL, ADA, DOT")]
    UnsupportedSymbol { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
    #[error("timestamp is outside the representable range: {value}")]
    TimestampOutOfRange { value: String },
    #[error("timestamp {timestamp} is later than acquisition time {acquired_at}")]
    TimestampInFuture {
        timestamp: String,
        acquired_at: String,
    },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be greater than zero")]
    NonPositiveValue { field: &'static str },

    #[error("trace_id must be 32 hex characters")]
    InvalidTraceId,

    #[error("invalid configuration value for {key}: '{value}'")]
    InvalidConfig { key: String, value: String },
}

/// Coarse classification of [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineErrorKind {
    InvalidSymbol,
    RateLimitExceeded,
    UpstreamUnavailable,
    UpstreamRejected,
    MalformedResponse,
    Persistence,
    InsufficientData,
    Cancelled,
}

impl PipelineErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidSymbol => "invalid_symbol",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::UpstreamRejected => "upstream_rejected",
            Self::MalformedResponse => "malformed_response",
            Self::Persistence => "persistence_error",
            Self::InsufficientData => "insufficient_data",
            Self::Cancelled => "cancelled",
        }
    }
}

impl Display for PipelineErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failures surfaced by the acquisition pipeline and the anomaly detector.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    #[error("invalid symbol: {0}")]
    InvalidSymbol(#[source] ValidationError),

    #[error("rate limit exceeded for caller '{caller_key}'")]
    RateLimitExceeded { caller_key: String },

    #[error("upstream unavailable after {attempts} attempt(s): {last_failure}")]
    UpstreamUnavailable {
        attempts: u32,
        last_failure: FetchFailure,
    },

    #[error("upstream rejected the request with status {status}")]
    UpstreamRejected { status: u16 },

    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("insufficient data for {symbol}: {available} point(s) stored, 2 required")]
    InsufficientData { symbol: Symbol, available: usize },

    #[error("request cancelled by caller")]
    Cancelled,
}

impl PipelineError {
    pub const fn kind(&self) -> PipelineErrorKind {
        match self {
            Self::InvalidSymbol(_) => PipelineErrorKind::InvalidSymbol,
            Self::RateLimitExceeded { .. } => PipelineErrorKind::RateLimitExceeded,
            Self::UpstreamUnavailable { .. } => PipelineErrorKind::UpstreamUnavailable,
            Self::UpstreamRejected { .. } => PipelineErrorKind::UpstreamRejected,
            Self::MalformedResponse(_) => PipelineErrorKind::MalformedResponse,
            Self::Persistence(_) => PipelineErrorKind::Persistence,
            Self::InsufficientData { .. } => PipelineErrorKind::InsufficientData,
            Self::Cancelled => PipelineErrorKind::Cancelled,
        }
    }

    /// Stable dotted error code for machine consumers.
    pub const fn code(&self) -> &'static str {
        match self.kind() {
            PipelineErrorKind::InvalidSymbol => "pipeline.invalid_symbol",
            PipelineErrorKind::RateLimitExceeded => "pipeline.rate_limit_exceeded",
            PipelineErrorKind::UpstreamUnavailable => "pipeline.upstream_unavailable",
            PipelineErrorKind::UpstreamRejected => "pipeline.upstream_rejected",
            PipelineErrorKind::MalformedResponse => "pipeline.malformed_response",
            PipelineErrorKind::Persistence => "pipeline.persistence_error",
            PipelineErrorKind::InsufficientData => "pipeline.insufficient_data",
            PipelineErrorKind::Cancelled => "pipeline.cancelled",
        }
    }

    /// Whether a caller may reasonably try the same call again later.
    ///
    /// The pipeline itself never retries these; transient upstream failures
    /// were already retried inside the fetcher.
    pub const fn retryable(&self) -> bool {
        matches!(
            self.kind(),
            PipelineErrorKind::RateLimitExceeded
                | PipelineErrorKind::UpstreamUnavailable
                | PipelineErrorKind::Persistence
        )
    }

    /// True for failures caused by the caller's input rather than the system.
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self.kind(),
            PipelineErrorKind::InvalidSymbol | PipelineErrorKind::RateLimitExceeded
        )
    }
}

impl From<marketpipe_warehouse::WarehouseError> for PipelineError {
    fn from(error: marketpipe_warehouse::WarehouseError) -> Self {
        Self::Persistence(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_namespaced_by_kind() {
        let error = PipelineError::RateLimitExceeded {
            caller_key: String::from("client-a"),
        };
        assert_eq!(error.kind(), PipelineErrorKind::RateLimitExceeded);
        assert_eq!(error.code(), "pipeline.rate_limit_exceeded");
        assert!(error.retryable());
        assert!(error.is_client_error());
    }

    #[test]
    fn invalid_symbol_keeps_validation_source() {
        let error = PipelineError::InvalidSymbol(ValidationError::UnsupportedSymbol {
            value: String::from("DOGE"),
        });
        assert!(error.to_string().contains("DOGE"));
        assert!(std::error::Error::source(&error).is_some());
        assert!(!error.retryable());
    }
}
