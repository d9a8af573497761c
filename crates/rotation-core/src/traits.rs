use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{
    Bar, DateRange, Interval, RotationDataPoint, RotationError, RotationParams, RotationResult, Sector,
};

/// Source of historical OHLC series
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn get_historical_data(
        &self,
        symbol: &str,
        range: &DateRange,
        interval: Interval,
    ) -> Result<Vec<Bar>, RotationError>;
}

/// Read side of the persisted rotation points
#[async_trait]
pub trait RotationReadRepository: Send + Sync {
    /// All points with `start <= date <= end`, ordered by date then symbol.
    async fn find_by_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RotationDataPoint>, RotationError>;

    async fn find_by_sector_and_date_range(
        &self,
        sector_symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RotationDataPoint>, RotationError>;

    /// Distinct dates in range that have at least one point for any of `sector_symbols`.
    async fn find_existing_dates(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        sector_symbols: &[String],
    ) -> Result<BTreeSet<NaiveDate>, RotationError>;

    async fn find_latest_date(&self) -> Result<Option<NaiveDate>, RotationError>;

    async fn find_latest_date_by_sector(
        &self,
        sector_symbol: &str,
    ) -> Result<Option<NaiveDate>, RotationError>;
}

/// Write side of the persisted rotation points. Writes upsert on `(date, sector_symbol)`.
#[async_trait]
pub trait RotationWriteRepository: Send + Sync {
    async fn save(&self, point: &RotationDataPoint) -> Result<(), RotationError>;

    async fn save_many(&self, points: &[RotationDataPoint]) -> Result<(), RotationError>;

    async fn delete_by_date_range(&self, start: NaiveDate, end: NaiveDate) -> Result<(), RotationError>;
}

/// Trait for RRG calculation engines
#[async_trait]
pub trait RotationCalculator: Send + Sync {
    async fn calculate(
        &self,
        sectors: &[Sector],
        range: &DateRange,
        params: &RotationParams,
    ) -> Result<RotationResult, RotationError>;
}
