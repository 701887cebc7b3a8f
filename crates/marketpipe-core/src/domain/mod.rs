//! # Domain Models
//!
//! Canonical domain types for marketpipe.
//!
//! All models enforce their invariants at construction time:
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Symbol`] | Whitelisted crypto symbol (BTC, ETH, SOL, ADA, DOT) |
//! | [`PricePoint`] | Immutable, strictly positive price at a UTC instant |
//! | [`AnomalyResult`] | Two-point comparison of the latest prices |
//! | [`UtcDateTime`] | UTC timestamp with nanosecond precision |
//!
//! ```rust,ignore
//! use marketpipe_core::{PricePoint, Symbol, UtcDateTime, ValidationError};
//!
//! let symbol = Symbol::parse("BTC")?;
//! let now = UtcDateTime::now();
//! let point = PricePoint::new(symbol, 50_000.0, now, now)?;
//!
//! // Zero prices are rejected
//! let invalid = PricePoint::new(symbol, 0.0, now, now);
//! assert!(matches!(invalid, Err(ValidationError::NonPositiveValue { .. })));
//! ```

mod models;
mod symbol;
mod timestamp;

pub use models::{AnomalyResult, PricePoint};
pub use symbol::Symbol;
pub use timestamp::UtcDateTime;
