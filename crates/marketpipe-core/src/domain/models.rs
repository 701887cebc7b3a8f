use serde::Serialize;

use crate::{Symbol, UtcDateTime, ValidationError};

/// Immutable price observation for one symbol.
///
/// Fields are private so a point can only be built through the validating
/// constructors; once created it is never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricePoint {
    symbol: Symbol,
    price: f64,
    timestamp: UtcDateTime,
}

impl PricePoint {
    /// Build a freshly acquired point. `timestamp` must not be later than
    /// `acquired_at`.
    pub fn new(
        symbol: Symbol,
        price: f64,
        timestamp: UtcDateTime,
        acquired_at: UtcDateTime,
    ) -> Result<Self, ValidationError> {
        if timestamp > acquired_at {
            return Err(ValidationError::TimestampInFuture {
                timestamp: timestamp.format_rfc3339(),
                acquired_at: acquired_at.format_rfc3339(),
            });
        }
        Self::restore(symbol, price, timestamp)
    }

    /// Rebuild a point read back from storage.
    pub fn restore(
        symbol: Symbol,
        price: f64,
        timestamp: UtcDateTime,
    ) -> Result<Self, ValidationError> {
        validate_positive("price", price)?;
        Ok(Self {
            symbol,
            price,
            timestamp,
        })
    }

    pub const fn symbol(&self) -> Symbol {
        self.symbol
    }

    pub const fn price(&self) -> f64 {
        self.price
    }

    pub const fn timestamp(&self) -> UtcDateTime {
        self.timestamp
    }
}

/// Outcome of comparing the two most recent points of a symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyResult {
    pub symbol: Symbol,
    pub previous: PricePoint,
    pub latest: PricePoint,
    /// Relative change as a fraction (0.06 means +6%).
    pub percent_change: f64,
    /// `latest.price - previous.price`.
    pub absolute_change: f64,
    pub threshold: f64,
    pub is_anomalous: bool,
}

impl AnomalyResult {
    /// Compare `latest` against `previous` using `threshold` as the minimum
    /// absolute relative change that counts as anomalous.
    pub fn compare(previous: PricePoint, latest: PricePoint, threshold: f64) -> Self {
        let absolute_change = latest.price - previous.price;
        // previous.price > 0 is a PricePoint invariant
        let percent_change = absolute_change / previous.price;

        Self {
            symbol: latest.symbol,
            previous,
            latest,
            percent_change,
            absolute_change,
            threshold,
            is_anomalous: percent_change.abs() >= threshold,
        }
    }
}

fn validate_positive(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    if value <= 0.0 {
        return Err(ValidationError::NonPositiveValue { field });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(input: &str) -> UtcDateTime {
        UtcDateTime::parse(input).expect("timestamp")
    }

    #[test]
    fn rejects_non_positive_and_non_finite_prices() {
        let at = ts("2024-01-01T00:00:00Z");
        assert!(matches!(
            PricePoint::new(Symbol::Btc, 0.0, at, at),
            Err(ValidationError::NonPositiveValue { field: "price" })
        ));
        assert!(matches!(
            PricePoint::new(Symbol::Btc, -3.0, at, at),
            Err(ValidationError::NonPositiveValue { .. })
        ));
        assert!(matches!(
            PricePoint::new(Symbol::Btc, f64::NAN, at, at),
            Err(ValidationError::NonFiniteValue { .. })
        ));
        assert!(matches!(
            PricePoint::restore(Symbol::Btc, f64::INFINITY, at),
            Err(ValidationError::NonFiniteValue { .. })
        ));
    }

    #[test]
    fn rejects_timestamp_after_acquisition() {
        let err = PricePoint::new(
            Symbol::Eth,
            10.0,
            ts("2024-01-01T00:00:01Z"),
            ts("2024-01-01T00:00:00Z"),
        )
        .expect_err("future timestamp must fail");
        assert!(matches!(err, ValidationError::TimestampInFuture { .. }));
    }

    #[test]
    fn compare_reports_relative_and_absolute_change() {
        let previous = PricePoint::restore(Symbol::Sol, 200.0, ts("2024-01-01T00:00:00Z"))
            .expect("point");
        let latest = PricePoint::restore(Symbol::Sol, 190.0, ts("2024-01-01T00:01:00Z"))
            .expect("point");

        let result = AnomalyResult::compare(previous, latest, 0.05);

        assert_eq!(result.symbol, Symbol::Sol);
        assert!((result.percent_change + 0.05).abs() < 1e-12);
        assert!((result.absolute_change + 10.0).abs() < 1e-12);
        assert!(result.is_anomalous, "a 5% drop meets a 5% threshold");
    }
}
