//! Two-point price-change tripwire.

use std::sync::Arc;

use crate::config::{validate_threshold, DEFAULT_ANOMALY_THRESHOLD};
use crate::context::RequestContext;
use crate::observer::PipelineEvent;
use crate::store::PriceStore;
use crate::{AnomalyResult, PipelineError, Symbol, ValidationError};

/// Flags a symbol when its latest price moved by at least `threshold`
/// (as a fraction) relative to the previous one.
#[derive(Clone)]
pub struct AnomalyDetector {
    store: Arc<dyn PriceStore>,
    threshold: f64,
}

impl std::fmt::Debug for AnomalyDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnomalyDetector")
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl AnomalyDetector {
    pub fn new(store: Arc<dyn PriceStore>, threshold: f64) -> Result<Self, ValidationError> {
        validate_threshold(threshold)?;
        Ok(Self { store, threshold })
    }

    pub fn with_default_threshold(store: Arc<dyn PriceStore>) -> Self {
        Self {
            store,
            threshold: DEFAULT_ANOMALY_THRESHOLD,
        }
    }

    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    pub async fn check(
        &self,
        symbol: Symbol,
        ctx: &RequestContext,
    ) -> Result<AnomalyResult, PipelineError> {
        let mut points = self.store.last_two(symbol).await?;
        if points.len() < 2 {
            return Err(PipelineError::InsufficientData {
                symbol,
                available: points.len(),
            });
        }

        // most recent first
        points.truncate(2);
        let previous = points.pop();
        let latest = points.pop();
        let (Some(previous), Some(latest)) = (previous, latest) else {
            return Err(PipelineError::InsufficientData {
                symbol,
                available: 0,
            });
        };

        let result = AnomalyResult::compare(previous, latest, self.threshold);
        ctx.emit(PipelineEvent::AnomalyChecked {
            result: result.clone(),
        });
        Ok(result)
    }
}
