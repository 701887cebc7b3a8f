//! Per-request context: trace id, cancellation and the event observer.

use std::fmt::{Display, Formatter};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::observer::{PipelineEvent, PipelineObserver, TracingObserver};
use crate::ValidationError;

/// Correlation id attached to every event and log line of one request.
///
/// Always 32 lowercase hex characters (a UUID in simple form).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceId(String);

impl TraceId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Accept a caller-supplied id, e.g. from an `X-Trace-ID` header.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        let valid = trimmed.len() == 32
            && trimmed.chars().all(|ch| ch.is_ascii_hexdigit())
            && trimmed.chars().any(|ch| ch != '0');
        if !valid {
            return Err(ValidationError::InvalidTraceId);
        }

        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TraceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Explicit context threaded through every pipeline operation.
#[derive(Clone)]
pub struct RequestContext {
    trace_id: TraceId,
    cancellation: CancellationToken,
    observer: Arc<dyn PipelineObserver>,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("trace_id", &self.trace_id)
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    /// Fresh trace id, a new cancellation token and the tracing observer.
    pub fn new() -> Self {
        Self {
            trace_id: TraceId::generate(),
            cancellation: CancellationToken::new(),
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = trace_id;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Same cancellation and observer, new trace id.
    pub fn child(&self) -> Self {
        Self {
            trace_id: TraceId::generate(),
            cancellation: self.cancellation.clone(),
            observer: Arc::clone(&self.observer),
        }
    }

    pub fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the request has been cancelled.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }

    /// Hand `event` to the observer. A panicking observer is contained here
    /// and never changes the outcome of the operation that emitted the event.
    pub fn emit(&self, event: PipelineEvent) {
        let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
            self.observer.on_event(&self.trace_id, &event);
        }));
        if delivered.is_err() {
            tracing::error!(trace_id = self.trace_id.as_str(), "pipeline observer panicked");
        }
    }
}
