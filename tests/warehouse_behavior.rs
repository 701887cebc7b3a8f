//! Behavior-driven tests for DuckDB-backed price storage
//!
//! These tests verify HOW collected prices survive the trip through the
//! warehouse, focusing on ordering, precision and durability.

use marketpipe_core::{
    HttpResponse, ManualClock, MarketPipeline, PipelineConfig, PipelineError, PricePoint,
    PriceStore, RequestContext, ScriptedHttpClient, Symbol, UtcDateTime,
};
use marketpipe_warehouse::{PriceRecord, Warehouse, WarehouseConfig, WarehouseError};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn open_in(dir: &std::path::Path) -> Warehouse {
    Warehouse::open(WarehouseConfig {
        marketpipe_home: dir.to_path_buf(),
        db_path: dir.join("prices.duckdb"),
        max_pool_size: 2,
    })
    .expect("warehouse open")
}

fn point(symbol: Symbol, price: f64, at: &str) -> PricePoint {
    PricePoint::restore(symbol, price, UtcDateTime::parse(at).expect("timestamp"))
        .expect("valid point")
}

// =============================================================================
// Warehouse: Round Trip
// =============================================================================

#[tokio::test]
async fn when_a_point_is_appended_it_reads_back_exactly() {
    // Given: A fresh warehouse
    let temp = tempdir().expect("tempdir");
    let warehouse = open_in(temp.path());
    let ctx = RequestContext::new();
    let original = point(Symbol::Eth, 3_456.789_012_345, "2025-02-03T04:05:06.123456789Z");

    // When: The point is appended and read back
    warehouse.append(&original, &ctx).await.expect("append");
    let last_two = warehouse.last_two(Symbol::Eth).await.expect("read back");

    // Then: Symbol, price and nanosecond timestamp are preserved
    assert_eq!(last_two, vec![original]);
}

#[tokio::test]
async fn when_points_arrive_out_of_order_reads_are_newest_first() {
    // Given: Three BTC points appended out of timestamp order plus one ETH point
    let temp = tempdir().expect("tempdir");
    let warehouse = open_in(temp.path());
    let ctx = RequestContext::new();
    for p in [
        point(Symbol::Btc, 2.0, "2025-01-01T00:02:00Z"),
        point(Symbol::Btc, 3.0, "2025-01-01T00:03:00Z"),
        point(Symbol::Btc, 1.0, "2025-01-01T00:01:00Z"),
        point(Symbol::Eth, 9.0, "2025-01-01T00:09:00Z"),
    ] {
        warehouse.append(&p, &ctx).await.expect("append");
    }

    // When: The history and last two points are read
    let history = warehouse.history(Symbol::Btc, 100).await.expect("history");
    let last_two = warehouse.last_two(Symbol::Btc).await.expect("last two");

    // Then: Only BTC is returned, most recent first
    let prices = history.iter().map(PricePoint::price).collect::<Vec<_>>();
    assert_eq!(prices, vec![3.0, 2.0, 1.0]);
    assert_eq!(last_two.len(), 2);
    assert_eq!(last_two[0].price(), 3.0);
    assert_eq!(last_two[1].price(), 2.0);
    assert!(warehouse.history(Symbol::Btc, 0).await.expect("empty").is_empty());
}

#[tokio::test]
async fn when_warehouse_is_reopened_prices_are_still_there() {
    // Given: A point stored by one warehouse handle
    let temp = tempdir().expect("tempdir");
    let ctx = RequestContext::new();
    {
        let warehouse = open_in(temp.path());
        warehouse
            .append(&point(Symbol::Sol, 140.0, "2025-03-01T00:00:00Z"), &ctx)
            .await
            .expect("append");
    }

    // When: The database file is opened again
    let reopened = open_in(temp.path());

    // Then: The point is readable and migrations are not reapplied twice
    assert_eq!(reopened.count_prices("SOL").expect("count"), 1);
    let history = reopened.history(Symbol::Sol, 10).await.expect("history");
    assert_eq!(history[0].price(), 140.0);
}

// =============================================================================
// Warehouse: Validation
// =============================================================================

#[test]
fn when_a_raw_record_has_a_non_positive_price_it_is_rejected() {
    // Given: A warehouse
    let temp = tempdir().expect("tempdir");
    let warehouse = open_in(temp.path());

    // When: A zero price is appended directly
    let error = warehouse
        .append_price(&PriceRecord {
            symbol: String::from("ADA"),
            price: 0.0,
            observed_at_ns: 0,
            trace_id: None,
        })
        .expect_err("zero price");

    // Then: The record is refused before touching the table
    assert!(matches!(error, WarehouseError::RecordRejected(_)));
    assert_eq!(warehouse.count_prices("ADA").expect("count"), 0);
}

// =============================================================================
// Warehouse: Through the Pipeline
// =============================================================================

#[tokio::test]
async fn when_pipeline_collects_into_the_warehouse_anomaly_uses_stored_points() {
    // Given: A pipeline writing to DuckDB and an upstream answering twice
    let temp = tempdir().expect("tempdir");
    let warehouse = Arc::new(open_in(temp.path()));
    let client = Arc::new(ScriptedHttpClient::new([
        Ok(HttpResponse::ok_json(r#"{"polkadot":{"usd":10.0}}"#)),
        Ok(HttpResponse::ok_json(r#"{"polkadot":{"usd":10.1}}"#)),
    ]));
    let clock = Arc::new(ManualClock::new(
        UtcDateTime::parse("2025-04-01T00:00:00Z").expect("timestamp"),
    ));
    let pipeline = MarketPipeline::with_transport(
        &PipelineConfig::default(),
        warehouse.clone(),
        client,
        clock.clone(),
    )
    .expect("pipeline");
    let ctx = RequestContext::new();

    // When: Two prices are collected a minute apart and checked
    pipeline
        .collect_once("DOT", "desk-1", &ctx)
        .await
        .expect("first collect");
    clock.advance(Duration::from_secs(60));
    pipeline
        .collect_once("DOT", "desk-1", &ctx)
        .await
        .expect("second collect");
    let result = pipeline.check_anomaly("DOT", &ctx).await.expect("check");

    // Then: A 1% move is not anomalous and the rows carry the trace id
    assert!(!result.is_anomalous);
    assert!((result.percent_change - 0.01).abs() < 1e-9);
    let rows = warehouse.latest_prices("DOT", 10).expect("rows");
    assert_eq!(rows.len(), 2);
    assert!(rows
        .iter()
        .all(|row| row.trace_id.as_deref() == Some(ctx.trace_id().as_str())));

    // And: An empty symbol reports insufficient data from DuckDB as well
    assert!(matches!(
        pipeline.check_anomaly("ADA", &ctx).await,
        Err(PipelineError::InsufficientData { available: 0, .. })
    ));
}
