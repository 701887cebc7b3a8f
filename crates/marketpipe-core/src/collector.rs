//! Rate limit, fetch and append as one logical unit.

use std::sync::Arc;

use crate::context::RequestContext;
use crate::fetcher::PriceFetcher;
use crate::observer::{PipelineEvent, Stage};
use crate::store::PriceStore;
use crate::throttling::FixedWindowRateLimiter;
use crate::{PipelineError, PricePoint, Symbol};

/// Orchestrates one acquisition: limiter, then fetcher, then store.
#[derive(Clone)]
pub struct Collector {
    limiter: Arc<FixedWindowRateLimiter>,
    fetcher: Arc<dyn PriceFetcher>,
    store: Arc<dyn PriceStore>,
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl Collector {
    pub fn new(
        limiter: Arc<FixedWindowRateLimiter>,
        fetcher: Arc<dyn PriceFetcher>,
        store: Arc<dyn PriceStore>,
    ) -> Self {
        Self {
            limiter,
            fetcher,
            store,
        }
    }

    pub fn limiter(&self) -> &FixedWindowRateLimiter {
        &self.limiter
    }

    pub fn store(&self) -> &Arc<dyn PriceStore> {
        &self.store
    }

    /// Collect and persist a single price for `symbol` on behalf of `caller_key`.
    ///
    /// A denied caller never reaches the fetcher or the store. A store failure
    /// is returned as is; the fetched point is not retried or buffered.
    pub async fn collect_once(
        &self,
        symbol: Symbol,
        caller_key: &str,
        ctx: &RequestContext,
    ) -> Result<PricePoint, PipelineError> {
        let result = self.collect_inner(symbol, caller_key, ctx).await;
        if let Err(error) = &result {
            ctx.emit(PipelineEvent::CollectFailed {
                symbol,
                error: error.clone(),
            });
        }
        result
    }

    async fn collect_inner(
        &self,
        symbol: Symbol,
        caller_key: &str,
        ctx: &RequestContext,
    ) -> Result<PricePoint, PipelineError> {
        if !self.limiter.allow(caller_key) {
            ctx.emit(PipelineEvent::RateLimited {
                caller_key: caller_key.to_owned(),
            });
            return Err(PipelineError::RateLimitExceeded {
                caller_key: caller_key.to_owned(),
            });
        }

        let started = tokio::time::Instant::now();
        let point = self.fetcher.fetch(symbol, ctx).await?;

        if ctx.is_cancelled() {
            ctx.emit(PipelineEvent::Cancelled {
                symbol,
                stage: Stage::Persist,
            });
            return Err(PipelineError::Cancelled);
        }

        self.store.append(&point, ctx).await?;
        ctx.emit(PipelineEvent::PointStored {
            point: point.clone(),
            duration: started.elapsed(),
        });
        Ok(point)
    }

    /// Collect each symbol in order, stopping early only on cancellation.
    pub async fn collect_many(
        &self,
        symbols: &[Symbol],
        caller_key: &str,
        ctx: &RequestContext,
    ) -> Vec<(Symbol, Result<PricePoint, PipelineError>)> {
        let mut results = Vec::with_capacity(symbols.len());
        for &symbol in symbols {
            let result = self.collect_once(symbol, caller_key, ctx).await;
            let cancelled = matches!(result, Err(PipelineError::Cancelled));
            results.push((symbol, result));
            if cancelled {
                break;
            }
        }
        results
    }
}
