//! Benchmark index series

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use rotation_core::{DateRange, FetchFailure, Interval, MarketDataProvider, RotationError};

use crate::week::weekly_closes;

/// Default benchmark: S&P 500 proxy
pub const DEFAULT_BENCHMARK_SYMBOL: &str = "SPY";

/// Fetches the benchmark and buckets it into one price per week.
#[derive(Clone)]
pub struct BenchmarkCalculator {
    provider: Arc<dyn MarketDataProvider>,
    symbol: String,
}

impl BenchmarkCalculator {
    pub fn new(provider: Arc<dyn MarketDataProvider>) -> Self {
        Self::with_symbol(provider, DEFAULT_BENCHMARK_SYMBOL)
    }

    pub fn with_symbol(provider: Arc<dyn MarketDataProvider>, symbol: &str) -> Self {
        Self {
            provider,
            symbol: symbol.trim().to_uppercase(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Weekly benchmark prices keyed by week Monday.
    ///
    /// A provider failure is a `TotalFetchFailure` naming the benchmark; an
    /// empty series or any non-finite or non-positive price is a `Validation`
    /// error.
    pub async fn weekly_prices(
        &self,
        range: &DateRange,
    ) -> Result<BTreeMap<NaiveDate, f64>, RotationError> {
        let bars = self
            .provider
            .get_historical_data(&self.symbol, range, Interval::Week1)
            .await
            .map_err(|e| {
                RotationError::TotalFetchFailure(vec![FetchFailure {
                    symbol: self.symbol.clone(),
                    error: e.to_string(),
                }])
            })?;

        let weekly = weekly_closes(&bars);
        if weekly.is_empty() {
            return Err(RotationError::Validation(format!(
                "Benchmark {} returned no data between {} and {}",
                self.symbol, range.start, range.end
            )));
        }

        if let Some((date, price)) = weekly.iter().find(|(_, p)| !p.is_finite() || **p <= 0.0) {
            return Err(RotationError::Validation(format!(
                "Benchmark {} has invalid price {} for week {}",
                self.symbol, price, date
            )));
        }

        tracing::debug!(
            "Benchmark {}: {} weekly prices from {} bars",
            self.symbol,
            weekly.len(),
            bars.len()
        );

        Ok(weekly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use rotation_core::Bar;

    struct FixedBars(Vec<(u32, f64)>);

    #[async_trait]
    impl MarketDataProvider for FixedBars {
        async fn get_historical_data(
            &self,
            _symbol: &str,
            _range: &DateRange,
            _interval: Interval,
        ) -> Result<Vec<Bar>, RotationError> {
            Ok(self
                .0
                .iter()
                .map(|&(day, close)| Bar {
                    timestamp: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: 0.0,
                })
                .collect())
        }
    }

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_weekly_prices() {
        let benchmark =
            BenchmarkCalculator::new(Arc::new(FixedBars(vec![(1, 470.0), (3, 471.0), (8, 475.0)])));
        assert_eq!(benchmark.symbol(), "SPY");

        let weekly = benchmark.weekly_prices(&range()).await.unwrap();
        assert_eq!(weekly.values().copied().collect::<Vec<_>>(), vec![470.0, 475.0]);
    }

    #[tokio::test]
    async fn test_rejects_bad_series() {
        let empty = BenchmarkCalculator::new(Arc::new(FixedBars(vec![])));
        assert!(matches!(
            empty.weekly_prices(&range()).await,
            Err(RotationError::Validation(_))
        ));

        let zero = BenchmarkCalculator::with_symbol(Arc::new(FixedBars(vec![(8, 0.0)])), "qqq");
        assert_eq!(zero.symbol(), "QQQ");
        assert!(matches!(
            zero.weekly_prices(&range()).await,
            Err(RotationError::Validation(_))
        ));
    }
}
