//! Structured pipeline events and the observers that consume them.

use std::sync::Mutex;
use std::time::Duration;

use crate::context::TraceId;
use crate::retry::{AttemptStatus, RetryAttempt};
use crate::{AnomalyResult, PipelineError, PricePoint, Symbol};

/// Pipeline stage at which a cancellation was noticed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Backoff,
    Persist,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Backoff => "backoff",
            Self::Persist => "persist",
        }
    }
}

/// Everything the pipeline reports while serving a request.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    RateLimited {
        caller_key: String,
    },
    FetchAttempt(RetryAttempt),
    PointStored {
        point: PricePoint,
        duration: Duration,
    },
    CollectFailed {
        symbol: Symbol,
        error: PipelineError,
    },
    AnomalyChecked {
        result: AnomalyResult,
    },
    Cancelled {
        symbol: Symbol,
        stage: Stage,
    },
}

/// Sink for [`PipelineEvent`]s.
///
/// Implementations must not block and should not panic. A panic raised here
/// is caught by [`RequestContext::emit`](crate::RequestContext::emit) and logged.
pub trait PipelineObserver: Send + Sync {
    fn on_event(&self, trace_id: &TraceId, event: &PipelineEvent);
}

/// Forwards events to `tracing` with stable field names.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl PipelineObserver for TracingObserver {
    fn on_event(&self, trace_id: &TraceId, event: &PipelineEvent) {
        let trace_id = trace_id.as_str();
        match event {
            PipelineEvent::RateLimited { caller_key } => {
                tracing::warn!(trace_id, caller_key = %caller_key, "rate limit exceeded");
            }
            PipelineEvent::FetchAttempt(attempt) => {
                let symbol = attempt.symbol.as_str();
                let duration_ms = millis(attempt.elapsed);
                let delay_ms = attempt.computed_delay.map(millis);
                match &attempt.status {
                    AttemptStatus::Succeeded => tracing::debug!(
                        trace_id,
                        symbol,
                        attempt = attempt.attempt_number,
                        duration_ms,
                        "upstream fetch succeeded"
                    ),
                    AttemptStatus::WillRetry(failure) => tracing::warn!(
                        trace_id,
                        symbol,
                        attempt = attempt.attempt_number,
                        duration_ms,
                        delay_ms,
                        status_code = failure.status_code(),
                        error = %failure,
                        "upstream fetch failed, retrying"
                    ),
                    AttemptStatus::Exhausted(failure) | AttemptStatus::Terminal(failure) => {
                        tracing::warn!(
                            trace_id,
                            symbol,
                            attempt = attempt.attempt_number,
                            duration_ms,
                            status_code = failure.status_code(),
                            error = %failure,
                            "upstream fetch failed"
                        )
                    }
                }
            }
            PipelineEvent::PointStored { point, duration } => tracing::info!(
                trace_id,
                symbol = point.symbol().as_str(),
                price = point.price(),
                duration_ms = millis(*duration),
                rows_affected = 1_u64,
                "price stored"
            ),
            PipelineEvent::CollectFailed { symbol, error } => tracing::error!(
                trace_id,
                symbol = symbol.as_str(),
                error_code = error.code(),
                retryable = error.retryable(),
                error = %error,
                "collection failed"
            ),
            PipelineEvent::AnomalyChecked { result } => tracing::info!(
                trace_id,
                symbol = result.symbol.as_str(),
                percent_change = result.percent_change,
                is_anomalous = result.is_anomalous,
                "anomaly check completed"
            ),
            PipelineEvent::Cancelled { symbol, stage } => tracing::info!(
                trace_id,
                symbol = symbol.as_str(),
                stage = stage.as_str(),
                "request cancelled"
            ),
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {
    fn on_event(&self, _trace_id: &TraceId, _event: &PipelineEvent) {}
}

/// Keeps every event in memory; intended for tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<(TraceId, PipelineEvent)>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.lock().iter().map(|(_, event)| event.clone()).collect()
    }

    pub fn trace_ids(&self) -> Vec<TraceId> {
        self.lock().iter().map(|(id, _)| id.clone()).collect()
    }

    /// Fetch attempts recorded so far, in order.
    pub fn attempts(&self) -> Vec<RetryAttempt> {
        self.lock()
            .iter()
            .filter_map(|(_, event)| match event {
                PipelineEvent::FetchAttempt(attempt) => Some(attempt.clone()),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(TraceId, PipelineEvent)>> {
        self.events
            .lock()
            .expect("recording observer lock is not poisoned")
    }
}

impl PipelineObserver for RecordingObserver {
    fn on_event(&self, trace_id: &TraceId, event: &PipelineEvent) {
        self.lock().push((trace_id.clone(), event.clone()));
    }
}
