//! # Marketpipe Core
//!
//! Resilient price acquisition for a fixed set of crypto assets, with a
//! two-point anomaly tripwire on top of an append-only time series.
//!
//! ## Overview
//!
//! - **Rate limiting** per caller key (fixed window)
//! - **Fetching** from CoinGecko under exponential backoff with jitter
//! - **Storage** through the [`PriceStore`] trait (in-memory or DuckDB)
//! - **Anomaly detection** over the two most recent points of a symbol
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`anomaly`] | Two-point anomaly detector |
//! | [`clock`] | Wall-clock abstraction |
//! | [`collector`] | Limiter, fetcher and store as one unit |
//! | [`config`] | Pipeline configuration and env overrides |
//! | [`context`] | Trace id, cancellation and observer per request |
//! | [`domain`] | Domain models (Symbol, PricePoint, AnomalyResult) |
//! | [`error`] | Core error types |
//! | [`fetcher`] | CoinGecko fetcher with retry loop |
//! | [`http_client`] | HTTP client abstraction |
//! | [`observer`] | Structured pipeline events |
//! | [`pipeline`] | String-typed facade |
//! | [`retry`] | Backoff policy and attempt classification |
//! | [`store`] | Price store trait and implementations |
//! | [`throttling`] | Caller rate limiter and upstream quota |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use marketpipe_core::{InMemoryStore, MarketPipeline, PipelineConfig, RequestContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::from_env()?;
//!     let pipeline = MarketPipeline::from_config(&config, Arc::new(InMemoryStore::new()))?;
//!     let ctx = RequestContext::new();
//!
//!     let point = pipeline.collect_once("BTC", "local", &ctx).await?;
//!     println!("BTC: ${:.2}", point.price());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ MarketPipeline  │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │   Collector     │────▶│ Rate Limiter     │
//! └────────┬────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Fetcher         │────▶│ HTTP Client      │
//! │ (Backoff loop)  │     │ (reqwest)        │
//! └────────┬────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ PriceStore      │◀────│ Anomaly Detector │
//! │ (memory/DuckDB) │     └──────────────────┘
//! └─────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use marketpipe_core::{PipelineError, PipelineErrorKind};
//!
//! fn handle_error(error: &PipelineError) {
//!     match error.kind() {
//!         PipelineErrorKind::RateLimitExceeded => {
//!             // Back off and try later
//!         }
//!         PipelineErrorKind::UpstreamUnavailable => {
//!             // Retries already exhausted inside the fetcher
//!         }
//!         _ => {}
//!     }
//! }
//! ```

pub mod anomaly;
pub mod clock;
pub mod collector;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod http_client;
pub mod observer;
pub mod pipeline;
pub mod retry;
pub mod store;
pub mod throttling;

pub use anomaly::AnomalyDetector;
pub use clock::{Clock, ManualClock, SystemClock};
pub use collector::Collector;
pub use config::{PipelineConfig, UpstreamQuotaConfig, DEFAULT_HISTORY_LIMIT};
pub use context::{RequestContext, TraceId};
pub use domain::{AnomalyResult, PricePoint, Symbol, UtcDateTime};
pub use error::{PipelineError, PipelineErrorKind, ValidationError};
pub use fetcher::{CoinGeckoFetcher, PriceFetcher};
pub use http_client::{
    HttpClient, HttpError, HttpErrorKind, HttpRequest, HttpResponse, ReqwestHttpClient,
    ScriptedHttpClient,
};
pub use observer::{
    NoopObserver, PipelineEvent, PipelineObserver, RecordingObserver, Stage, TracingObserver,
};
pub use pipeline::MarketPipeline;
pub use retry::{AttemptOutcome, AttemptStatus, BackoffPolicy, FetchFailure, RetryAttempt};
pub use store::{InMemoryStore, PriceStore};
pub use throttling::{FixedWindowRateLimiter, RateLimitConfig, UpstreamQuota, WindowSnapshot};

// Warehouse (re-exported from marketpipe-warehouse)
pub use marketpipe_warehouse::{Warehouse, WarehouseConfig, WarehouseError};
