//! String-typed facade over the collector, the store and the detector.

use std::sync::Arc;

use crate::anomaly::AnomalyDetector;
use crate::clock::{Clock, SystemClock};
use crate::collector::Collector;
use crate::config::PipelineConfig;
use crate::context::RequestContext;
use crate::fetcher::{CoinGeckoFetcher, PriceFetcher};
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::store::PriceStore;
use crate::throttling::FixedWindowRateLimiter;
use crate::{AnomalyResult, PipelineError, PricePoint, Symbol, ValidationError};

/// Entry point used by the CLI and embedding services.
///
/// Every operation parses its symbol first, so an unsupported symbol fails
/// with [`PipelineError::InvalidSymbol`] before touching the limiter, the
/// network or the store.
#[derive(Clone)]
pub struct MarketPipeline {
    collector: Collector,
    detector: AnomalyDetector,
    store: Arc<dyn PriceStore>,
}

impl std::fmt::Debug for MarketPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketPipeline")
            .field("collector", &self.collector)
            .field("detector", &self.detector)
            .finish_non_exhaustive()
    }
}

impl MarketPipeline {
    /// Production wiring: reqwest transport, system clock, CoinGecko fetcher.
    pub fn from_config(
        config: &PipelineConfig,
        store: Arc<dyn PriceStore>,
    ) -> Result<Self, ValidationError> {
        Self::with_transport(
            config,
            store,
            Arc::new(ReqwestHttpClient::default()),
            Arc::new(SystemClock),
        )
    }

    pub fn with_transport(
        config: &PipelineConfig,
        store: Arc<dyn PriceStore>,
        http_client: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ValidationError> {
        config.validate()?;
        let fetcher = Arc::new(CoinGeckoFetcher::from_config(config, http_client, clock));
        Self::assemble(config, store, fetcher)
    }

    /// Wire the pipeline around an arbitrary fetcher.
    pub fn assemble(
        config: &PipelineConfig,
        store: Arc<dyn PriceStore>,
        fetcher: Arc<dyn PriceFetcher>,
    ) -> Result<Self, ValidationError> {
        let limiter = Arc::new(FixedWindowRateLimiter::new(config.rate_limit));
        let detector = AnomalyDetector::new(Arc::clone(&store), config.anomaly_threshold)?;
        Ok(Self {
            collector: Collector::new(limiter, fetcher, Arc::clone(&store)),
            detector,
            store,
        })
    }

    pub async fn collect_once(
        &self,
        symbol: &str,
        caller_key: &str,
        ctx: &RequestContext,
    ) -> Result<PricePoint, PipelineError> {
        let symbol = parse_symbol(symbol)?;
        self.collector.collect_once(symbol, caller_key, ctx).await
    }

    /// Collect several symbols in order; invalid symbols fail individually.
    pub async fn collect_many(
        &self,
        symbols: &[&str],
        caller_key: &str,
        ctx: &RequestContext,
    ) -> Vec<(String, Result<PricePoint, PipelineError>)> {
        let mut results = Vec::with_capacity(symbols.len());
        for raw in symbols {
            let result = self.collect_once(raw, caller_key, ctx).await;
            let cancelled = matches!(result, Err(PipelineError::Cancelled));
            results.push(((*raw).to_owned(), result));
            if cancelled {
                break;
            }
        }
        results
    }

    pub async fn check_anomaly(
        &self,
        symbol: &str,
        ctx: &RequestContext,
    ) -> Result<AnomalyResult, PipelineError> {
        let symbol = parse_symbol(symbol)?;
        self.detector.check(symbol, ctx).await
    }

    /// Stored points for `symbol`, most recent first.
    pub async fn history(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<PricePoint>, PipelineError> {
        let symbol = parse_symbol(symbol)?;
        self.store.history(symbol, limit).await
    }

    pub fn supported_symbols(&self) -> &'static [Symbol] {
        &Symbol::ALL
    }

    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    pub fn detector(&self) -> &AnomalyDetector {
        &self.detector
    }
}

fn parse_symbol(input: &str) -> Result<Symbol, PipelineError> {
    Symbol::parse(input).map_err(PipelineError::InvalidSymbol)
}
