//! RRG calculation
//!
//! For each sector:
//!
//! * `RS = 100 * sector / benchmark` per week
//! * `x = 100 + 3 * z(EMA(RS))` with a rolling z-score over the normalization window
//! * `y = 100 + 3 * z(EMA(diff(x)))`, same smoothing and window
//!
//! Sector fetches run concurrently; a failed sector is dropped with a warning
//! unless every sector fails.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use rotation_core::{
    DateRange, FetchFailure, Interval, MarketDataProvider, RotationCalculator, RotationDataPoint,
    RotationError, RotationParams, RotationResult, Sector, RS_SMOOTHING_PERIOD,
};
use tokio::task::JoinSet;

use crate::benchmark::BenchmarkCalculator;
use crate::ema::ema_smooth;
use crate::rolling_stats::rolling_z_scores;
use crate::week::{monday_of, weekly_closes, WeeklySeries};

/// Centre of the RS-Ratio / RS-Momentum scales
const RRG_CENTER: f64 = 100.0;
/// Scale applied to z-scores
const RRG_SCALE: f64 = 3.0;

type WeeklyPrices = BTreeMap<NaiveDate, f64>;

pub struct RotationCalculationService {
    provider: Arc<dyn MarketDataProvider>,
    benchmark: BenchmarkCalculator,
}

impl RotationCalculationService {
    pub fn new(provider: Arc<dyn MarketDataProvider>, benchmark_symbol: &str) -> Self {
        Self {
            benchmark: BenchmarkCalculator::with_symbol(provider.clone(), benchmark_symbol),
            provider,
        }
    }

    pub fn benchmark_symbol(&self) -> &str {
        self.benchmark.symbol()
    }

    /// Fetch every sector concurrently. Results keep the input order; failed
    /// sectors are returned separately.
    async fn fetch_sectors(
        &self,
        sectors: &[Sector],
        range: &DateRange,
    ) -> (Vec<(Sector, WeeklyPrices)>, Vec<FetchFailure>) {
        let mut tasks = JoinSet::new();

        for (idx, sector) in sectors.iter().enumerate() {
            let provider = Arc::clone(&self.provider);
            let symbol = sector.symbol.clone();
            let range = *range;
            tasks.spawn(async move {
                let result = provider
                    .get_historical_data(&symbol, &range, Interval::Week1)
                    .await
                    .map(|bars| weekly_closes(&bars));
                (idx, result)
            });
        }

        let mut slots: Vec<Option<Result<WeeklyPrices, String>>> = vec![None; sectors.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result.map_err(|e| e.to_string())),
                Err(e) => tracing::error!("Sector fetch task failed: {}", e),
            }
        }

        let mut fetched = Vec::with_capacity(sectors.len());
        let mut failures = Vec::new();
        for (sector, slot) in sectors.iter().zip(slots) {
            match slot {
                Some(Ok(prices)) => fetched.push((sector.clone(), prices)),
                Some(Err(error)) => failures.push(FetchFailure {
                    symbol: sector.symbol.clone(),
                    error,
                }),
                None => failures.push(FetchFailure {
                    symbol: sector.symbol.clone(),
                    error: "fetch task did not complete".to_string(),
                }),
            }
        }

        (fetched, failures)
    }
}

#[async_trait]
impl RotationCalculator for RotationCalculationService {
    async fn calculate(
        &self,
        sectors: &[Sector],
        range: &DateRange,
        params: &RotationParams,
    ) -> Result<RotationResult, RotationError> {
        if sectors.is_empty() {
            return Err(RotationError::Validation(
                "At least one sector is required".to_string(),
            ));
        }
        params.validate()?;

        let lookback = params.lookback_weeks();
        let extended = range.extend_back_weeks(lookback)?;

        tracing::info!(
            "📈 Calculating rotation for {} sectors, {} to {} (lookback {} weeks)",
            sectors.len(),
            range.start,
            range.end,
            lookback
        );

        let (fetched, failures) = self.fetch_sectors(sectors, &extended).await;

        if fetched.is_empty() {
            return Err(RotationError::TotalFetchFailure(failures));
        }
        for failure in &failures {
            tracing::warn!(
                "Skipping sector {} after fetch failure: {}",
                failure.symbol,
                failure.error
            );
        }

        let min_weeks = lookback as usize + 2;
        for (sector, prices) in &fetched {
            if prices.len() < min_weeks {
                return Err(RotationError::InsufficientData(format!(
                    "{} has {} weekly prices, need at least {}",
                    sector.symbol,
                    prices.len(),
                    min_weeks
                )));
            }
        }

        let benchmark = self.benchmark.weekly_prices(&extended).await?;
        let origin = monday_of(extended.start);

        let mut data_points = Vec::new();
        for (sector, prices) in &fetched {
            data_points.extend(sector_points(
                &sector.symbol,
                prices,
                &benchmark,
                origin,
                params,
                range,
            )?);
        }

        // Stable: per-date order follows sector order.
        data_points.sort_by_key(|p| p.date);

        if data_points.is_empty() {
            return Err(RotationError::InsufficientData(format!(
                "No rotation points between {} and {}",
                range.start, range.end
            )));
        }

        let sector_symbols = fetched.iter().map(|(s, _)| s.symbol.clone()).collect();

        tracing::info!(
            "✅ Rotation calculated: {} points for {}/{} sectors",
            data_points.len(),
            fetched.len(),
            sectors.len()
        );

        RotationResult::new(range.start, range.end, data_points, sector_symbols)
    }
}

/// Relative strength for the weeks where both prices are usable.
pub(crate) fn relative_strength(
    prices: &WeeklyPrices,
    benchmark: &WeeklyPrices,
    origin: NaiveDate,
) -> WeeklySeries {
    let mut rs = WeeklySeries::new(origin);
    for (&date, &price) in prices {
        let Some(&bench) = benchmark.get(&date) else {
            continue;
        };
        if bench <= 0.0 || !price.is_finite() || price <= 0.0 {
            continue;
        }
        let ratio = RRG_CENTER * price / bench;
        if ratio.is_finite() && ratio > 0.0 {
            let index = rs.index_of(date);
            rs.push(index, ratio);
        }
    }
    rs
}

fn normalize(series: &WeeklySeries, window_weeks: u32) -> WeeklySeries {
    rolling_z_scores(&ema_smooth(series, RS_SMOOTHING_PERIOD), window_weeks)
        .map_values(|z| RRG_CENTER + RRG_SCALE * z)
}

/// RRG points of one sector inside `range`.
pub(crate) fn sector_points(
    symbol: &str,
    prices: &WeeklyPrices,
    benchmark: &WeeklyPrices,
    origin: NaiveDate,
    params: &RotationParams,
    range: &DateRange,
) -> Result<Vec<RotationDataPoint>, RotationError> {
    let rs = relative_strength(prices, benchmark, origin);
    let x = normalize(&rs, params.normalization_window_weeks);
    let y = normalize(&x.first_differences(), params.normalization_window_weeks);

    let mut points = Vec::new();
    for (index, y_value) in y.iter() {
        let (Some(x_value), Some(rs_value)) = (x.get(index), rs.get(index)) else {
            continue;
        };
        let date = y.date_of(index);
        if !range.contains(date) {
            continue;
        }
        if !(x_value.is_finite() && y_value.is_finite() && rs_value.is_finite()) {
            continue;
        }
        let Some(&price) = prices.get(&date) else {
            continue;
        };
        points.push(RotationDataPoint::new(
            date, symbol, price, rs_value, x_value, y_value,
        )?);
    }

    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn monday(week: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::weeks(week)
    }

    fn weekly(values: impl IntoIterator<Item = (i64, f64)>) -> WeeklyPrices {
        values.into_iter().map(|(w, v)| (monday(w), v)).collect()
    }

    #[test]
    fn test_relative_strength_skips_unusable_weeks() {
        let prices = weekly([(0, 50.0), (1, 60.0), (2, 70.0), (3, 80.0)]);
        let benchmark = weekly([(0, 100.0), (1, 0.0), (3, 400.0)]);

        let rs: Vec<_> = relative_strength(&prices, &benchmark, monday(0)).iter().collect();
        assert_eq!(rs, vec![(0, 50.0), (3, 20.0)]);
    }

    #[test]
    fn test_sector_points_are_finite_and_in_range() {
        let prices = weekly((0..40).map(|w| (w, 100.0 + (w as f64 * 0.7).sin() * 5.0 + w as f64)));
        let benchmark = weekly((0..40).map(|w| (w, 400.0 + w as f64 * 0.5)));
        let range = DateRange::new(monday(20), monday(39)).unwrap();

        let points = sector_points(
            "XLK",
            &prices,
            &benchmark,
            monday(0),
            &RotationParams::default(),
            &range,
        )
        .unwrap();

        assert!(!points.is_empty());
        assert!(points.len() <= 20);
        for p in &points {
            assert!(range.contains(p.date));
            assert!(p.x.is_finite() && p.y.is_finite() && p.relative_strength.is_finite());
            assert_eq!(p.sector_symbol, "XLK");
            assert_eq!(p.price, prices[&p.date]);
        }
        assert!(points.windows(2).all(|w| w[0].date < w[1].date));
    }

    #[test]
    fn test_flat_relative_strength_yields_no_points() {
        let prices = weekly((0..30).map(|w| (w, 50.0)));
        let benchmark = weekly((0..30).map(|w| (w, 100.0)));
        let range = DateRange::new(monday(0), monday(29)).unwrap();

        let points = sector_points(
            "XLE",
            &prices,
            &benchmark,
            monday(0),
            &RotationParams::default(),
            &range,
        )
        .unwrap();
        assert!(points.is_empty());
    }
}
