//! Append-only time-series storage for price points.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use marketpipe_warehouse::{PriceRecord, Warehouse, WarehouseError};

use crate::context::RequestContext;
use crate::{PipelineError, PricePoint, Symbol, UtcDateTime};

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, PipelineError>> + Send + 'a>>;

/// Storage contract shared by the collector and the anomaly detector.
pub trait PriceStore: Send + Sync {
    /// Append one point atomically.
    fn append<'a>(&'a self, point: &'a PricePoint, ctx: &'a RequestContext) -> StoreFuture<'a, ()>;

    /// Up to `limit` points for `symbol`, most recent first.
    fn history<'a>(&'a self, symbol: Symbol, limit: usize) -> StoreFuture<'a, Vec<PricePoint>>;

    /// The two most recent points, most recent first. May hold 0, 1 or 2 points.
    fn last_two<'a>(&'a self, symbol: Symbol) -> StoreFuture<'a, Vec<PricePoint>> {
        self.history(symbol, 2)
    }
}

/// Process-local store keeping each symbol's points sorted by timestamp.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    series: RwLock<HashMap<Symbol, Vec<PricePoint>>>,
    append_calls: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored points across all symbols.
    pub fn len(&self) -> usize {
        self.series
            .read()
            .expect("in-memory store lock is not poisoned")
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times `append` was invoked, including rejected calls.
    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    fn insert(&self, point: PricePoint) {
        let mut series = self
            .series
            .write()
            .expect("in-memory store lock is not poisoned");
        let points = series.entry(point.symbol()).or_default();
        // after any equal timestamps, so ties keep insertion order
        let index = points.partition_point(|existing| existing.timestamp() <= point.timestamp());
        points.insert(index, point);
    }

    fn newest(&self, symbol: Symbol, limit: usize) -> Vec<PricePoint> {
        self.series
            .read()
            .expect("in-memory store lock is not poisoned")
            .get(&symbol)
            .map(|points| points.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }
}

impl PriceStore for InMemoryStore {
    fn append<'a>(
        &'a self,
        point: &'a PricePoint,
        _ctx: &'a RequestContext,
    ) -> StoreFuture<'a, ()> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        self.insert(point.clone());
        Box::pin(async { Ok(()) })
    }

    fn history<'a>(&'a self, symbol: Symbol, limit: usize) -> StoreFuture<'a, Vec<PricePoint>> {
        let points = self.newest(symbol, limit);
        Box::pin(async move { Ok(points) })
    }
}

impl PriceStore for Warehouse {
    fn append<'a>(&'a self, point: &'a PricePoint, ctx: &'a RequestContext) -> StoreFuture<'a, ()> {
        Box::pin(append_to_warehouse(self, point, ctx))
    }

    fn history<'a>(&'a self, symbol: Symbol, limit: usize) -> StoreFuture<'a, Vec<PricePoint>> {
        Box::pin(read_from_warehouse(self, symbol, limit))
    }
}

async fn append_to_warehouse(
    warehouse: &Warehouse,
    point: &PricePoint,
    ctx: &RequestContext,
) -> Result<(), PipelineError> {
    let record = PriceRecord {
        symbol: point.symbol().as_str().to_owned(),
        price: point.price(),
        observed_at_ns: point
            .timestamp()
            .unix_nanos()
            .map_err(|error| PipelineError::Persistence(error.to_string()))?,
        trace_id: Some(ctx.trace_id().as_str().to_owned()),
    };

    let warehouse = warehouse.clone();
    run_blocking(move || warehouse.append_price(&record)).await
}

async fn read_from_warehouse(
    warehouse: &Warehouse,
    symbol: Symbol,
    limit: usize,
) -> Result<Vec<PricePoint>, PipelineError> {
    let warehouse = warehouse.clone();
    let records = run_blocking(move || warehouse.latest_prices(symbol.as_str(), limit)).await?;
    records.iter().map(|record| restore(symbol, record)).collect()
}

async fn run_blocking<T, F>(task: F) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, WarehouseError> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|error| PipelineError::Persistence(format!("storage task failed: {error}")))?
        .map_err(PipelineError::from)
}

fn restore(symbol: Symbol, record: &PriceRecord) -> Result<PricePoint, PipelineError> {
    let timestamp = UtcDateTime::from_unix_nanos(record.observed_at_ns)
        .map_err(|error| PipelineError::Persistence(format!("corrupt stored row: {error}")))?;
    PricePoint::restore(symbol, record.price, timestamp)
        .map_err(|error| PipelineError::Persistence(format!("corrupt stored row: {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(symbol: Symbol, price: f64, at: &str) -> PricePoint {
        PricePoint::restore(symbol, price, UtcDateTime::parse(at).expect("timestamp"))
            .expect("valid point")
    }

    #[tokio::test]
    async fn in_memory_history_is_newest_first_per_symbol() {
        let store = InMemoryStore::new();
        let ctx = RequestContext::new();

        for p in [
            point(Symbol::Btc, 2.0, "2024-01-01T00:02:00Z"),
            point(Symbol::Btc, 1.0, "2024-01-01T00:01:00Z"),
            point(Symbol::Eth, 9.0, "2024-01-01T00:05:00Z"),
            point(Symbol::Btc, 3.0, "2024-01-01T00:03:00Z"),
        ] {
            store.append(&p, &ctx).await.expect("append");
        }

        let history = store.history(Symbol::Btc, 10).await.expect("history");
        let prices = history.iter().map(PricePoint::price).collect::<Vec<_>>();
        assert_eq!(prices, vec![3.0, 2.0, 1.0]);

        let last_two = store.last_two(Symbol::Btc).await.expect("last two");
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].price(), 3.0);

        assert!(store.last_two(Symbol::Dot).await.expect("empty").is_empty());
        assert_eq!(store.len(), 4);
        assert_eq!(store.append_calls(), 4);
    }

    #[tokio::test]
    async fn equal_timestamps_keep_insertion_order() {
        let store = InMemoryStore::new();
        let ctx = RequestContext::new();

        store
            .append(&point(Symbol::Sol, 10.0, "2024-01-01T00:00:00Z"), &ctx)
            .await
            .expect("append");
        store
            .append(&point(Symbol::Sol, 11.0, "2024-01-01T00:00:00Z"), &ctx)
            .await
            .expect("append");

        let last_two = store.last_two(Symbol::Sol).await.expect("last two");
        assert_eq!(last_two[0].price(), 11.0);
        assert_eq!(last_two[1].price(), 10.0);
    }

    #[test]
    fn corrupt_rows_surface_as_persistence_errors() {
        let record = PriceRecord {
            symbol: String::from("ADA"),
            price: -1.0,
            observed_at_ns: 0,
            trace_id: None,
        };
        assert!(matches!(
            restore(Symbol::Ada, &record),
            Err(PipelineError::Persistence(_))
        ));
    }
}
